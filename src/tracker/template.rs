//! Template-matching single-target tracker.
//!
//! The appearance of the object at init time is kept as a grayscale
//! template. Each update searches a window around the Kalman-predicted
//! position and accepts the best normalized cross-correlation peak when it
//! scores high enough.

use image::{GrayImage, RgbImage, imageops};
use imageproc::template_matching::{MatchTemplateMethod, find_extremes, match_template};

use crate::tracker::kalman_filter::{KalmanFilter, KalmanState};
use crate::tracker::rect::Rect;
use crate::tracker::track::SingleTargetTracker;

#[derive(Debug, Clone)]
pub struct TemplateConfig {
    /// Extra search area on each side, as a fraction of the box size.
    pub search_margin: f32,
    /// Minimum normalized correlation to accept a match.
    pub min_score: f32,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            search_margin: 1.0,
            min_score: 0.7,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateTracker {
    config: TemplateConfig,
    kalman: KalmanFilter,
    template: Option<GrayImage>,
    state: Option<KalmanState>,
}

impl TemplateTracker {
    pub fn new(config: TemplateConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    fn scale(template: &GrayImage) -> f64 {
        template.height().max(template.width()) as f64
    }
}

impl SingleTargetTracker for TemplateTracker {
    fn init(&mut self, image: &RgbImage, bbox: Rect) {
        self.template = None;
        self.state = None;

        let clipped = bbox.clamp_to(image.width(), image.height());
        let x = clipped.x1.floor() as u32;
        let y = clipped.y1.floor() as u32;
        let w = clipped.x2.ceil() as u32 - x;
        let h = clipped.y2.ceil() as u32 - y;
        if w < 2 || h < 2 {
            return;
        }

        let gray = imageops::grayscale(image);
        let template = imageops::crop_imm(&gray, x, y, w, h).to_image();
        let (cx, cy) = (x as f64 + w as f64 / 2.0, y as f64 + h as f64 / 2.0);
        self.state = Some(self.kalman.initiate([cx, cy], Self::scale(&template)));
        self.template = Some(template);
    }

    fn update(&mut self, image: &RgbImage) -> Option<Rect> {
        let template = self.template.as_ref()?;
        let state = self.state.as_mut()?;
        let scale = Self::scale(template);
        let (tw, th) = (template.width() as f64, template.height() as f64);

        self.kalman.predict(state, scale);
        let (cx, cy) = state.position();

        let mx = tw * self.config.search_margin as f64;
        let my = th * self.config.search_margin as f64;
        let (iw, ih) = (image.width() as f64, image.height() as f64);
        let x0 = (cx - tw / 2.0 - mx).floor().clamp(0.0, iw);
        let y0 = (cy - th / 2.0 - my).floor().clamp(0.0, ih);
        let x1 = (cx + tw / 2.0 + mx).ceil().clamp(0.0, iw);
        let y1 = (cy + th / 2.0 + my).ceil().clamp(0.0, ih);
        if x1 - x0 < tw || y1 - y0 < th {
            return None;
        }

        let gray = imageops::grayscale(image);
        let window = imageops::crop_imm(
            &gray,
            x0 as u32,
            y0 as u32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        )
        .to_image();

        let scores = match_template(&window, template, MatchTemplateMethod::CrossCorrelationNormalized);
        let extremes = find_extremes(&scores);
        // NaN (all-black window) fails this comparison as well.
        if !(extremes.max_value >= self.config.min_score) {
            return None;
        }

        let (lx, ly) = extremes.max_value_location;
        let bbox = Rect::from_tlwh(
            (x0 + lx as f64) as f32,
            (y0 + ly as f64) as f32,
            tw as f32,
            th as f32,
        );
        let (mcx, mcy) = bbox.center();
        self.kalman.update(state, [mcx as f64, mcy as f64], scale);
        Some(bbox)
    }
}
