use serde::{Deserialize, Serialize};

/// How the packager is told about the field of view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FieldOfView {
    /// Horizontal field of view in degrees (wide action cameras).
    Horizontal { degrees: f64 },
    /// Sensor width and focal length in millimetres (interchangeable-lens bodies).
    Lens {
        sensor_width_mm: f64,
        focal_length_mm: f64,
    },
}

/// Viewing geometry handed to the spatial-photo packager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SpatialParams {
    /// Distance between the two lenses.
    pub baseline_mm: f64,
    pub fov: FieldOfView,
}

impl SpatialParams {
    pub fn validate(&self) -> Result<(), String> {
        if !self.baseline_mm.is_finite() || self.baseline_mm <= 0.0 {
            return Err(format!("baseline must be positive, got {}", self.baseline_mm));
        }
        match self.fov {
            FieldOfView::Horizontal { degrees } => {
                if !degrees.is_finite() || degrees <= 0.0 || degrees > 360.0 {
                    return Err(format!("hfov must be in (0, 360], got {degrees}"));
                }
            }
            FieldOfView::Lens {
                sensor_width_mm,
                focal_length_mm,
            } => {
                if !sensor_width_mm.is_finite() || sensor_width_mm <= 0.0 {
                    return Err(format!("sensor width must be positive, got {sensor_width_mm}"));
                }
                if !focal_length_mm.is_finite() || focal_length_mm <= 0.0 {
                    return Err(format!("focal length must be positive, got {focal_length_mm}"));
                }
            }
        }
        Ok(())
    }
}
