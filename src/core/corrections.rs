//! Processing flags and the subaqueous refraction correction

use crate::types::{
    BathyError, BathyResult, ClassifierKind, PhotonFrame, BATHYMETRY, SEA_SURFACE, UNCLASSIFIED,
};

/// Bits 8..15 of `processing_flags` carry the scaled ensemble confidence
pub const CONFIDENCE_SHIFT: u32 = 8;

/// Final class of every photon: the ensemble label when present, otherwise
/// the input `class_ph` restricted to {0, 40, 41}
pub fn final_labels(frame: &PhotonFrame) -> Vec<i8> {
    match frame.label(ClassifierKind::Ensemble) {
        Some(labels) => labels.to_vec(),
        None => frame
            .class_ph
            .iter()
            .map(|c| match *c {
                BATHYMETRY | SEA_SURFACE => *c,
                _ => UNCLASSIFIED,
            })
            .collect(),
    }
}

/// OR classifier bathymetry bits and the confidence byte into `processing_flags`
pub fn set_processing_flags(frame: &mut PhotonFrame) {
    let mut flags = std::mem::take(&mut frame.processing_flags);

    for (kind, column) in &frame.labels {
        let Some(bit) = kind.flag_bit() else { continue };
        for (flag, label) in flags.iter_mut().zip(column) {
            if *label == BATHYMETRY {
                *flag |= 1 << bit;
            }
        }
    }

    if let Some(confidence) = &frame.confidence {
        for (flag, c) in flags.iter_mut().zip(confidence) {
            // floor(c * 255) so that 1.0 maps to 255; a x256 truncation would wrap it to 0
            let scaled = (c.clamp(0.0, 1.0) * 255.0).floor() as u32;
            *flag |= scaled << CONFIDENCE_SHIFT;
        }
    }

    frame.processing_flags = flags;
}

/// Move subaqueous photons to their refracted position.
///
/// Photons below the surface whose final class is not sea surface get
/// `refracted_dZ` added to both heights, the refracted coordinates and the
/// subaqueous uncertainties. Returns the selection mask.
pub fn apply_subaqueous_correction(frame: &mut PhotonFrame) -> BathyResult<Vec<bool>> {
    if frame.subaqueous_corrected {
        return Err(BathyError::Processing(
            "Subaqueous correction has already been applied".to_string(),
        ));
    }

    let labels = final_labels(frame);
    let selected: Vec<bool> = (0..frame.len())
        .map(|i| {
            frame.ortho_h[i] < frame.surface_h[i]
                && matches!(labels[i], UNCLASSIFIED | BATHYMETRY)
        })
        .collect();

    for (i, _) in selected.iter().enumerate().filter(|(_, s)| **s) {
        let dz = frame.refracted_dz[i];
        frame.ortho_h[i] += dz;
        frame.ellipse_h[i] += dz;
        frame.lat_ph[i] = frame.refracted_lat[i];
        frame.lon_ph[i] = frame.refracted_lon[i];
        frame.sigma_thu[i] = frame.subaqueous_sigma_thu[i];
        frame.sigma_tvu[i] = frame.subaqueous_sigma_tvu[i];
    }
    frame.subaqueous_corrected = true;

    log::info!(
        "Applied subaqueous correction to {} of {} photons",
        selected.iter().filter(|s| **s).count(),
        frame.len()
    );
    Ok(selected)
}
