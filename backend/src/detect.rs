use std::{fmt::Debug, time::Duration};

use anyhow::{Result, bail};
use log::{debug, info};
#[cfg(test)]
use mockall::automock;
use opencv::{
    core::{CV_32S, Mat, MatTraitConst, Point, bitwise_not_def, subtract_def},
    imgcodecs::{IMREAD_GRAYSCALE, imread},
    imgproc::{CC_STAT_AREA, THRESH_BINARY, connected_components_with_stats, threshold},
};
use tokio::time::Instant;

use crate::DetectorSettings;

/// Finds a moving target in grayscale wide-field frames.
#[cfg_attr(test, automock)]
pub trait Detector: Debug + Send {
    /// Detects the target in `frame`, returning its centroid pixel.
    ///
    /// The first frame after construction or [`Detector::rearm`] becomes the background and
    /// never yields a detection.
    fn detect(&mut self, frame: &Mat) -> Result<Option<Point>>;

    /// Drops the background so that the next frame replaces it.
    fn rearm(&mut self);

    /// Updates the minimum frame delta accepted as motion, returning `false` if out of `0..=255`.
    fn set_threshold(&mut self, threshold: i32) -> bool;
}

/// How the frame delta is filtered before thresholding.
#[derive(Debug)]
enum Strategy {
    Basic,
    /// Suppresses pixels where the mask was black.
    Masked { inverted_mask: Mat },
}

/// Background subtraction detector picking the largest bright moving region.
#[derive(Debug)]
pub struct MotionDetector {
    strategy: Strategy,
    threshold: u8,
    min_area: i32,
    max_area: i32,
    min_intensity: u8,
    background: Option<Mat>,
    background_instant: Instant,
    background_refresh: Duration,
}

impl MotionDetector {
    /// Creates the detector, loading the mask image if one is configured.
    pub fn new(settings: &DetectorSettings) -> Result<Self> {
        let Some(path) = settings.mask_path.as_ref() else {
            return Ok(Self::with_strategy(settings, Strategy::Basic));
        };

        let path = path.to_string_lossy();
        let mask = imread(&path, IMREAD_GRAYSCALE)?;
        if mask.empty() {
            bail!("failed to load detection mask {path}");
        }
        info!(target: "detector", "using detection mask {path}");
        Self::with_mask(settings, &mask)
    }

    /// Creates a masked detector where black pixels of `mask` are never detected.
    pub fn with_mask(settings: &DetectorSettings, mask: &Mat) -> Result<Self> {
        let mut inverted_mask = Mat::default();
        bitwise_not_def(mask, &mut inverted_mask)?;
        Ok(Self::with_strategy(
            settings,
            Strategy::Masked { inverted_mask },
        ))
    }

    fn with_strategy(settings: &DetectorSettings, strategy: Strategy) -> Self {
        Self {
            strategy,
            threshold: settings.threshold,
            min_area: settings.min_area,
            max_area: settings.max_area,
            min_intensity: settings.min_intensity,
            background: None,
            background_instant: Instant::now(),
            background_refresh: Duration::from_millis(settings.background_refresh_millis),
        }
    }

    fn capture_background(&mut self, frame: &Mat) -> Result<()> {
        self.background = Some(frame.try_clone()?);
        self.background_instant = Instant::now();
        Ok(())
    }

    fn detect_against(&self, background: &Mat, frame: &Mat) -> Result<Option<Point>> {
        let mut delta = Mat::default();
        subtract_def(frame, background, &mut delta)?;
        if let Strategy::Masked { inverted_mask } = &self.strategy {
            let mut masked = Mat::default();
            subtract_def(&delta, inverted_mask, &mut masked)?;
            delta = masked;
        }

        let mut binary = Mat::default();
        threshold(
            &delta,
            &mut binary,
            self.threshold as f64,
            255.0,
            THRESH_BINARY,
        )?;

        let mut labels = Mat::default();
        let mut stats = Mat::default();
        let mut centroids = Mat::default();
        let count = connected_components_with_stats(
            &binary,
            &mut labels,
            &mut stats,
            &mut centroids,
            8,
            CV_32S,
        )?;

        let mut best = None::<(i32, Point)>;
        // Label 0 is the background
        for label in 1..count {
            let area = *stats.at_2d::<i32>(label, CC_STAT_AREA)?;
            if area < self.min_area || area > self.max_area {
                continue;
            }

            let x = *centroids.at_2d::<f64>(label, 0)?;
            let y = *centroids.at_2d::<f64>(label, 1)?;
            let centroid = Point::new(x as i32, y as i32);
            if *frame.at_pt::<u8>(centroid)? <= self.min_intensity {
                continue;
            }

            if best.is_none_or(|(best_area, _)| area > best_area) {
                best = Some((area, centroid));
            }
        }

        Ok(best.map(|(_, centroid)| centroid))
    }
}

impl Detector for MotionDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Option<Point>> {
        let Some(background) = self.background.as_ref() else {
            debug!(target: "detector", "capturing background");
            self.capture_background(frame)?;
            return Ok(None);
        };

        if background.size()? != frame.size()? {
            info!(target: "detector", "frame size changed, capturing background");
            self.capture_background(frame)?;
            return Ok(None);
        }

        let target = self.detect_against(background, frame)?;
        if target.is_none() && self.background_instant.elapsed() >= self.background_refresh {
            debug!(target: "detector", "refreshing stale background");
            self.capture_background(frame)?;
        }

        Ok(target)
    }

    fn rearm(&mut self) {
        self.background = None;
    }

    fn set_threshold(&mut self, threshold: i32) -> bool {
        match u8::try_from(threshold) {
            Ok(threshold) => {
                self.threshold = threshold;
                true
            }
            Err(_) => false,
        }
    }
}
