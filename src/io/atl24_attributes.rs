//! Dataset attributes of the ATL24 HDF5 layout

/// HDF5 group a dataset is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Metadata,
    Ancillary,
    Orbit,
    Beam,
}

/// Attributes every dataset carries, plus the optional ones some add
#[derive(Debug, Clone, PartialEq)]
pub struct Attributes {
    pub content_type: &'static str,
    pub description: &'static str,
    pub long_name: &'static str,
    pub source: &'static str,
    pub units: &'static str,
    pub coordinates: Option<&'static str>,
    pub standard_name: Option<&'static str>,
    pub flag_meanings: Option<&'static str>,
    pub flag_values: Option<&'static [i8]>,
}

/// Datasets of `ancillary_data/` in write order
pub const ANCILLARY_DATASETS: [&str; 27] = [
    "atlas_sdp_gps_epoch",
    "data_end_utc",
    "data_start_utc",
    "end_cycle",
    "end_delta_time",
    "end_geoseg",
    "end_gpssow",
    "end_gpsweek",
    "end_orbit",
    "end_region",
    "end_rgt",
    "granule_end_utc",
    "granule_start_utc",
    "release",
    "resource",
    "sliderule_version",
    "sliderule_commit",
    "sliderule_environment",
    "start_cycle",
    "start_delta_time",
    "start_geoseg",
    "start_gpssow",
    "start_gpsweek",
    "start_orbit",
    "start_region",
    "start_rgt",
    "version",
];

/// Datasets of `orbit_info/` in write order
pub const ORBIT_DATASETS: [&str; 7] = [
    "crossing_time",
    "cycle_number",
    "lan",
    "orbit_number",
    "rgt",
    "sc_orient",
    "sc_orient_time",
];

const fn base(
    content_type: &'static str,
    description: &'static str,
    long_name: &'static str,
    source: &'static str,
    units: &'static str,
) -> Attributes {
    Attributes {
        content_type,
        description,
        long_name,
        source,
        units,
        coordinates: None,
        standard_name: None,
        flag_meanings: None,
        flag_values: None,
    }
}

const fn aux(description: &'static str, long_name: &'static str, source: &'static str, units: &'static str) -> Attributes {
    base("auxiliaryInformation", description, long_name, source, units)
}

const fn reference(description: &'static str, long_name: &'static str, source: &'static str, units: &'static str) -> Attributes {
    base("referenceInformation", description, long_name, source, units)
}

fn photon(
    content_type: &'static str,
    coordinates: &'static str,
    description: &'static str,
    long_name: &'static str,
    source: &'static str,
    units: &'static str,
) -> Attributes {
    Attributes {
        coordinates: Some(coordinates),
        ..base(content_type, description, long_name, source, units)
    }
}

const ALL_COORDS: &str = "delta_time lat_ph lon_ph";

/// Attributes for `name` in `group`, `None` for datasets outside the layout
pub fn lookup(group: Group, name: &str) -> Option<Attributes> {
    match group {
        Group::Metadata => metadata(name),
        Group::Ancillary => ancillary(name),
        Group::Orbit => orbit(name),
        Group::Beam => beam(name),
    }
}

fn metadata(name: &str) -> Option<Attributes> {
    let attrs = match name {
        "sliderule" => aux("sliderule server and request information", "SlideRule MetaData", "Derived", "json"),
        "profile" => aux("runtimes of the various algorithms", "Algorithm RunTimes", "Derived", "json"),
        "stats" => aux("granule level statistics", "Granule Metrics", "Derived", "json"),
        _ => return None,
    };
    Some(attrs)
}

fn ancillary(name: &str) -> Option<Attributes> {
    let attrs = match name {
        "atlas_sdp_gps_epoch" => aux(
            "Number of GPS seconds between the GPS epoch (1980-01-06T00:00:00.000000Z UTC) and the ATLAS Standard Data Product (SDP) epoch (2018-01-01:T00.00.00.000000 UTC). Add this value to delta time parameters to compute full gps_seconds (relative to the GPS epoch) for each data point.",
            "ATLAS Epoch Offset",
            "Operations",
            "seconds since 1980-01-06T00:00:00.000000Z",
        ),
        "data_end_utc" => aux(
            "UTC (in CCSDS-A format) of the last data point within the granule.",
            "End UTC Time of Granule (CCSDS-A, Actual)",
            "Derived",
            "1",
        ),
        "data_start_utc" => aux(
            "UTC (in CCSDS-A format) of the first data point within the granule.",
            "Start UTC Time of Granule (CCSDS-A, Actual)",
            "Derived",
            "1",
        ),
        "end_cycle" => aux(
            "The ending cycle number associated with the data contained within this granule. The cycle number is the counter of the number of 91-day repeat cycles completed by the mission.",
            "Ending Cycle",
            "Derived",
            "1",
        ),
        "end_delta_time" => Attributes {
            standard_name: Some("time"),
            ..aux(
                "Number of GPS seconds since the ATLAS SDP epoch at the last data point in the file.",
                "ATLAS End Time (Actual)",
                "Derived",
                "seconds since 2018-01-01",
            )
        },
        "end_geoseg" => aux(
            "The ending geolocation segment number associated with the data contained within this granule. A geolocation segment is created approximately every 20m from the start of the orbit to the end.",
            "Ending Geolocation Segment",
            "Derived",
            "1",
        ),
        "end_gpssow" => aux(
            "GPS seconds-of-week of the last data point in the granule.",
            "Ending GPS SOW of Granule (Actual)",
            "Derived",
            "seconds",
        ),
        "end_gpsweek" => aux(
            "GPS week number of the last data point in the granule.",
            "Ending GPSWeek of Granule (Actual)",
            "Derived",
            "weeks from 1980-01-06",
        ),
        "end_orbit" => aux(
            "The ending orbit number associated with the data contained within this granule. The orbit number increments each time the spacecraft completes a full orbit of the Earth.",
            "Ending Orbit Number",
            "Derived",
            "1",
        ),
        "end_region" => aux(
            "The ending product-specific region number associated with the data contained within this granule.",
            "Ending Region",
            "Derived",
            "1",
        ),
        "end_rgt" => aux(
            "The ending reference groundtrack (RGT) number associated with the data contained within this granule. There are 1387 reference groundtrack in the ICESat-2 repeat orbit.",
            "Ending Reference Groundtrack",
            "Derived",
            "1",
        ),
        "granule_end_utc" => aux(
            "Requested end time (in UTC CCSDS-A) of this granule.",
            "End UTC Time of Granule (CCSDS-A, Requested)",
            "Derived",
            "1",
        ),
        "granule_start_utc" => aux(
            "Requested start time (in UTC CCSDS-A) of this granule.",
            "Start UTC Time of Granule (CCSDS-A, Requested)",
            "Derived",
            "1",
        ),
        "release" => aux(
            "Release number of the granule. The release number is incremented when the software or ancillary data used to create the granule has been changed.",
            "Release Number",
            "Operations",
            "1",
        ),
        "resource" => aux("ATL03 granule used to produce this granule", "ATL03 Resource", "Operations", "1"),
        "sliderule_version" => aux(
            "Version of SlideRule software used to generate this granule",
            "SlideRule Version",
            "Operations",
            "1",
        ),
        "sliderule_commit" => aux(
            "Git commit ID of SlideRule software used to generate this granule",
            "SlideRule Commit",
            "Operations",
            "1",
        ),
        "sliderule_environment" => aux(
            "Git commit ID of SlideRule environment used to generate this granule",
            "SlideRule Environment",
            "Operations",
            "1",
        ),
        "start_cycle" => aux(
            "The starting cycle number associated with the data contained within this granule. The cycle number is the counter of the number of 91-day repeat cycles completed by the mission.",
            "Starting Cycle",
            "Derived",
            "1",
        ),
        "start_delta_time" => aux(
            "Number of GPS seconds since the ATLAS SDP epoch at the first data point in the file.",
            "ATLAS Start Time (Actual)",
            "Derived",
            "seconds since 2018-01-01",
        ),
        "start_geoseg" => aux(
            "The starting geolocation segment number associated with the data contained within this granule. A geolocation segment is created approximately every 20m from the start of the orbit to the end.",
            "Starting Geolocation Segment",
            "Derived",
            "1",
        ),
        "start_gpssow" => aux(
            "GPS seconds-of-week of the first data point in the granule.",
            "Start GPS SOW of Granule (Actual)",
            "Derived",
            "seconds",
        ),
        "start_gpsweek" => aux(
            "GPS week number of the first data point in the granule.",
            "Start GPSWeek of Granule (Actual)",
            "Derived",
            "weeks from 1980-01-06",
        ),
        "start_orbit" => aux(
            "The starting orbit number associated with the data contained within this granule. The orbit number increments each time the spacecraft completes a full orbit of the Earth.",
            "Starting Orbit Number",
            "Derived",
            "1",
        ),
        "start_region" => aux(
            "The starting product-specific region number associated with the data contained within this granule.",
            "Starting Region",
            "Derived",
            "1",
        ),
        "start_rgt" => aux(
            "The starting reference groundtrack (RGT) number associated with the data contained within this granule. There are 1387 reference groundtrack in the ICESat-2 repeat orbit.",
            "Starting Reference Groundtrack",
            "Derived",
            "1",
        ),
        "version" => aux(
            "Version number of this granule within the release. It is a sequential number corresponding to the number of times the granule has been reprocessed for the current release.",
            "Version",
            "Operations",
            "1",
        ),
        _ => return None,
    };
    Some(attrs)
}

fn orbit(name: &str) -> Option<Attributes> {
    let attrs = match name {
        "crossing_time" => Attributes {
            standard_name: Some("time"),
            ..reference(
                "The time, in seconds since the ATLAS SDP GPS Epoch, at which the ascending node crosses the equator.",
                "Ascending Node Crossing Time",
                "POD/PPD",
                "seconds since 2018-01-01",
            )
        },
        "cycle_number" => reference(
            "Tracks the number of 91-day cycles in the mission, beginning with 01. A unique orbit number can be determined by subtracting 1 from the cycle_number, multiplying by 1387 and adding the rgt value.",
            "Cycle Number",
            "POD/PPD",
            "counts",
        ),
        "lan" => reference(
            "Longitude at the ascending node crossing.",
            "Ascending Node Longitude",
            "POD/PPD",
            "degrees_east",
        ),
        "orbit_number" => reference(
            "Unique identifying number for each planned ICESat-2 orbit.",
            "Orbit Number",
            "Operations",
            "1",
        ),
        "rgt" => reference(
            "The reference ground track (RGT) is the track on the earth at which a specified unit vector within the observatory is pointed. The ICESat-2 mission has 1387 RGTs.",
            "Reference Ground Track",
            "POD/PPD",
            "counts",
        ),
        "sc_orient" => Attributes {
            flag_meanings: Some("backward forward transition"),
            flag_values: Some(&[0, 1, 2]),
            ..reference(
                "This parameter tracks the spacecraft orientation between forward, backward and transitional flight modes. ICESat-2 is considered to be flying forward when the weak beams are leading the strong beams; and backward when the strong beams are leading the weak beams.",
                "Spacecraft Orientation",
                "POD/PPD",
                "1",
            )
        },
        "sc_orient_time" => Attributes {
            standard_name: Some("time"),
            ..reference(
                "The time of the last spacecraft orientation change between forward, backward and transitional flight modes, expressed in seconds since the ATLAS SDP GPS Epoch.",
                "Time of Last Spacecraft Orientation Change",
                "POD/PPD",
                "seconds since 2018-01-01",
            )
        },
        _ => return None,
    };
    Some(attrs)
}

fn beam(name: &str) -> Option<Attributes> {
    let attrs = match name {
        "index_ph" => photon(
            "physicalMeasurement",
            ALL_COORDS,
            "0-based index of the photon in the ATL03 heights group",
            "Photon index",
            "ATL03",
            "scalar",
        ),
        "index_seg" => photon(
            "physicalMeasurement",
            ALL_COORDS,
            "0-based index of the photon in the ATL03 geolocation group",
            "Segment index",
            "ATL03",
            "scalar",
        ),
        "delta_time" => photon(
            "physicalMeasurement",
            "lat_ph lon_ph",
            "The transmit time of a given photon, measured in seconds from the ATLAS Standard Data Product Epoch.",
            "Elapsed GPS seconds",
            "ATL03",
            "seconds since 2018-01-01",
        ),
        "lat_ph" => Attributes {
            standard_name: Some("latitude"),
            ..photon(
                "modelResult",
                "delta_time lon_ph",
                "Latitude of each received photon. Computed from the ECF Cartesian coordinates of the bounce point.",
                "Latitude",
                "ATL03",
                "degrees_north",
            )
        },
        "lon_ph" => Attributes {
            standard_name: Some("longitude"),
            ..photon(
                "modelResult",
                "delta_time lat_ph",
                "Longitude of each received photon. Computed from the ECF Cartesian coordinates of the bounce point.",
                "Longitude",
                "ATL03",
                "degrees_east",
            )
        },
        "x_atc" => photon(
            "modelResult",
            ALL_COORDS,
            "Along-track distance in a segment projected to the ellipsoid of the received photon, based on the Along-Track Segment algorithm.",
            "Distance from equator crossing",
            "ATL03",
            "meters",
        ),
        "y_atc" => photon(
            "modelResult",
            ALL_COORDS,
            "Across-track distance projected to the ellipsoid of the received photon from the reference ground track.",
            "Distance off RGT",
            "ATL03",
            "meters",
        ),
        "ellipse_h" => photon(
            "physicalMeasurement",
            ALL_COORDS,
            "Height of each received photon, relative to the WGS-84 ellipsoid including refraction correction.",
            "Photon WGS84 height",
            "ATL03",
            "meters",
        ),
        "ortho_h" => photon(
            "physicalMeasurement",
            ALL_COORDS,
            "Height of each received photon, relative to the geoid.",
            "Orthometric height",
            "ATL03",
            "meters",
        ),
        "surface_h" => photon(
            "modelResult",
            ALL_COORDS,
            "The geoid corrected height of the sea surface at the detected photon",
            "Sea surface orthometric height",
            "ATL03",
            "meters",
        ),
        "depth" => photon(
            "modelResult",
            ALL_COORDS,
            "Depth of the photon below the sea surface",
            "Depth",
            "ATL24",
            "meters",
        ),
        "sigma_thu" => photon(
            "physicalMeasurement",
            ALL_COORDS,
            "The combination of the aerial and subaqueous horizontal uncertainty for each received photon",
            "Total horizontal uncertainty",
            "ATL03",
            "meters",
        ),
        "sigma_tvu" => photon(
            "modelResult",
            ALL_COORDS,
            "The combination of the aerial and subaqueous vertical uncertainty for each received photon",
            "Total vertical uncertainty",
            "ATL03",
            "meters",
        ),
        "flags" => photon(
            "modelResult",
            ALL_COORDS,
            "Processing flags; bits 24-30 mark bathymetry from individual classifiers and bits 8-15 carry the scaled ensemble confidence",
            "Processing flags",
            "ATL24",
            "bitfield",
        ),
        "confidence" => photon(
            "modelResult",
            ALL_COORDS,
            "ensemble confidence score from 0.0 to 1.0 where larger numbers represent higher confidence in classification",
            "Ensemble confidence",
            "ATL24",
            "scalar",
        ),
        "low_confidence_flag" => photon(
            "modelResult",
            ALL_COORDS,
            "There is low confidence that the photon classified as bathymetry is actually bathymetry",
            "Low confidence bathymetry flag",
            "ATL24",
            "boolean",
        ),
        "class_ph" => photon(
            "modelResult",
            ALL_COORDS,
            "0 - unclassified, 1 - other, 40 - bathymetry, 41 - sea surface",
            "Photon classification",
            "ATL24",
            "scalar",
        ),
        "qtrees" | "coastnet" | "openoceanspp" | "medianfilter" | "cshelph" | "bathypathfinder"
        | "pointnet" | "openoceans" => photon(
            "modelResult",
            ALL_COORDS,
            "Classification from an individual classifier: 0 - unclassified, 40 - bathymetry, 41 - sea surface",
            "Classifier label",
            "ATL24",
            "scalar",
        ),
        _ => return None,
    };
    Some(attrs)
}
