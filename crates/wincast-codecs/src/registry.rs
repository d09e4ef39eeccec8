use wincast_types::PixelFormat;

use crate::spec::{CscSpec, StillEncoderSpec, VideoEncoderSpec};

/// Subsampling penalty applied to a video encoder's declared quality when
/// its effective input format throws away chroma resolution. 4:2:0 loses
/// both axes, 4:2:2 only the horizontal one, 4:4:4/RGB lose nothing.
fn subsampling_quality_factor(format: PixelFormat) -> f64 {
    match format {
        PixelFormat::Yuv420p => 0.85,
        PixelFormat::Yuv422p => 0.92,
        _ => 1.0,
    }
}

/// A scored candidate: a video encoder, optionally preceded by a CSC stage
/// that gets the source pixels into a format the encoder accepts.
#[derive(Clone)]
pub struct PipelineCandidate {
    pub csc: Option<CscSpec>,
    pub encoder: VideoEncoderSpec,
}

impl PipelineCandidate {
    /// The format the encoder actually receives: the CSC's output if one is
    /// present, otherwise the source format passed to
    /// [`EncoderRegistry::candidates`].
    #[must_use]
    fn effective_input_format(&self, src_format: PixelFormat) -> PixelFormat {
        self.csc.as_ref().map_or(src_format, |c| c.output_format)
    }

    #[must_use]
    pub fn can_handle(&self, src_format: PixelFormat, width: u32, height: u32) -> bool {
        let csc_ok = self
            .csc
            .as_ref()
            .map_or(true, |c| c.can_handle(src_format, width, height));
        csc_ok && self.encoder.can_handle(self.effective_input_format(src_format), width, height)
    }
}

/// Snapshot of the video encoder/CSC stages currently live in a
/// [`crate::VideoPipeline`], used only to compute the edge-resistance term
/// of the scoring function - keeping the existing pipeline alive avoids a
/// rebuild (and the resulting key frame) when two candidates otherwise
/// score about the same.
#[derive(Debug, Clone, Copy)]
pub struct LivePipelineDescriptor {
    pub csc_name: Option<&'static str>,
    pub encoder_name: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Score components for one candidate, kept separate for tests and
/// diagnostics rather than collapsed straight to the final average.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateScore {
    pub quality_score: f64,
    pub speed_score: f64,
    pub edge_resistance_score: f64,
}

impl CandidateScore {
    #[must_use]
    pub fn total(&self) -> f64 {
        (self.quality_score + self.speed_score + self.edge_resistance_score) / 3.0
    }
}

/// Catalog of every still encoder, CSC converter and video encoder the
/// pipeline knows how to construct, built once per connection and shared
/// (via `Arc`) across that connection's windows - the "per-connection
/// `VideoPipelineHelper`" design note in place of a process-wide singleton.
#[derive(Clone)]
pub struct EncoderRegistry {
    still_encoders: Vec<StillEncoderSpec>,
    cscs: Vec<CscSpec>,
    video_encoders: Vec<VideoEncoderSpec>,
}

impl EncoderRegistry {
    #[must_use]
    pub fn new(still_encoders: Vec<StillEncoderSpec>, cscs: Vec<CscSpec>, video_encoders: Vec<VideoEncoderSpec>) -> Self {
        Self {
            still_encoders,
            cscs,
            video_encoders,
        }
    }

    /// The registry wired up with every still/CSC/video encoder this build
    /// was compiled with (governed by the crate's `png`/`jpeg`/`webp`/
    /// `video-h264` features), enumerated once at startup.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            still_encoders: crate::still::default_still_encoders(),
            cscs: crate::csc::default_cscs(),
            video_encoders: crate::video::default_video_encoders(),
        }
    }

    #[must_use]
    pub fn still_encoders(&self) -> &[StillEncoderSpec] {
        &self.still_encoders
    }

    #[must_use]
    pub fn cscs(&self) -> &[CscSpec] {
        &self.cscs
    }

    #[must_use]
    pub fn video_encoders(&self) -> &[VideoEncoderSpec] {
        &self.video_encoders
    }

    /// The encoder among `still_encoders()` this crate falls back to when
    /// every scored candidate has failed: the cheapest lossless still that
    /// accepts `format`, if one exists.
    #[must_use]
    pub fn fallback_lossless_still(&self, format: PixelFormat) -> Option<&StillEncoderSpec> {
        self.still_encoders
            .iter()
            .filter(|spec| spec.lossless && spec.accepted_formats.contains(&format))
            .min_by_key(|spec| spec.setup_cost)
    }

    /// Direct (no-CSC) and via-CSC candidates for encoding `src_format`
    /// pixels of `width x height` as `output_codec` (e.g. `"x264"`,
    /// `"vpx"`).
    #[must_use]
    pub fn candidates(&self, output_codec: &str, src_format: PixelFormat) -> Vec<PipelineCandidate> {
        let mut out = Vec::new();
        for encoder in &self.video_encoders {
            if encoder.name != output_codec {
                continue;
            }
            if encoder.accepted_format == src_format {
                out.push(PipelineCandidate {
                    csc: None,
                    encoder: encoder.clone(),
                });
            }
            for csc in &self.cscs {
                if csc.input_format == src_format && csc.output_format == encoder.accepted_format {
                    out.push(PipelineCandidate {
                        csc: Some(csc.clone()),
                        encoder: encoder.clone(),
                    });
                }
            }
        }
        out
    }

    /// Scores one candidate against the controller's current targets and
    /// (optionally) the currently-live pipeline.
    #[must_use]
    pub fn score(
        &self,
        candidate: &PipelineCandidate,
        src_format: PixelFormat,
        target_quality: u8,
        target_speed: u8,
        min_quality: u8,
        current: Option<LivePipelineDescriptor>,
    ) -> CandidateScore {
        let effective_input = candidate.effective_input_format(src_format);
        let mut effective_quality = f64::from(candidate.encoder.quality) * subsampling_quality_factor(effective_input);
        let mut effective_speed = f64::from(candidate.encoder.speed);
        if let Some(csc) = &candidate.csc {
            effective_quality *= f64::from(csc.quality) / 100.0;
            effective_speed *= f64::from(csc.speed) / 100.0;
        }

        let quality_score = if effective_quality < f64::from(min_quality) {
            0.0
        } else {
            (100.0 - (effective_quality - f64::from(target_quality)).abs()).clamp(0.0, 100.0)
        };
        let speed_score = (100.0 - (effective_speed - f64::from(target_speed)).abs()).clamp(0.0, 100.0);

        let mut penalty = 0.0;
        if let Some(current) = current {
            if candidate.encoder.name != current.encoder_name {
                penalty += f64::from(candidate.encoder.setup_cost);
            }
            let csc_name = candidate.csc.as_ref().map(|c| c.name);
            if csc_name != current.csc_name {
                penalty += candidate.csc.as_ref().map_or(0.0, |c| f64::from(c.setup_cost));
            }
        }
        let edge_resistance_score = (100.0 - penalty).clamp(0.0, 100.0);

        CandidateScore {
            quality_score,
            speed_score,
            edge_resistance_score,
        }
    }

    /// The highest-scoring `can_handle` candidate for `output_codec`,
    /// ties broken in favor of whatever is currently live.
    #[must_use]
    pub fn best_candidate(
        &self,
        output_codec: &str,
        src_format: PixelFormat,
        width: u32,
        height: u32,
        target_quality: u8,
        target_speed: u8,
        min_quality: u8,
        current: Option<LivePipelineDescriptor>,
    ) -> Option<PipelineCandidate> {
        let mut scored: Vec<(PipelineCandidate, f64)> = self
            .candidates(output_codec, src_format)
            .into_iter()
            .filter(|c| c.can_handle(src_format, width, height))
            .map(|c| {
                let score = self
                    .score(&c, src_format, target_quality, target_speed, min_quality, current)
                    .total();
                (c, score)
            })
            .collect();

        if scored.is_empty() {
            return None;
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let top_score = scored[0].1;
        // Tie-break: prefer whatever matches the currently live encoder.
        if let Some(current) = current {
            if let Some((candidate, _)) = scored
                .iter()
                .take_while(|(_, s)| (*s - top_score).abs() < f64::EPSILON)
                .find(|(c, _)| c.encoder.name == current.encoder_name)
            {
                return Some(candidate.clone());
            }
        }
        Some(scored.remove(0).0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{CscConverter, StillEncoder, VideoEncoderImpl};
    use wincast_types::Image;

    struct NoopCsc;
    impl CscConverter for NoopCsc {
        fn convert(&mut self, image: &dyn Image) -> crate::error::Result<wincast_types::HeapImage> {
            Ok(wincast_types::HeapImage::new(
                image.width(),
                image.height(),
                image.width() * 2,
                PixelFormat::Yuv420p,
                image.pixels().to_vec(),
            ))
        }
    }

    struct NoopEncoder;
    impl VideoEncoderImpl for NoopEncoder {
        fn encode(&mut self, _image: &dyn Image, _quality: u8, _speed: u8) -> crate::error::Result<Vec<u8>> {
            Ok(vec![0])
        }
        fn reset(&mut self) {}
    }

    struct NoopStill;
    impl StillEncoder for NoopStill {
        fn encode(&mut self, _image: &dyn Image, _params: crate::spec::EncodeParams) -> crate::error::Result<Vec<u8>> {
            Ok(vec![0])
        }
    }

    fn csc(name: &'static str, out: PixelFormat) -> CscSpec {
        CscSpec {
            name,
            input_format: PixelFormat::Bgrx,
            output_format: out,
            quality: 100,
            speed: 100,
            setup_cost: 20,
            max_dimensions: None,
            construct: || Box::new(NoopCsc),
        }
    }

    fn encoder(name: &'static str, fmt: PixelFormat, quality: u8, speed: u8) -> VideoEncoderSpec {
        VideoEncoderSpec {
            name,
            accepted_format: fmt,
            quality,
            speed,
            setup_cost: 30,
            max_dimensions: None,
            construct: || Box::new(NoopEncoder),
        }
    }

    #[test]
    fn direct_and_via_csc_candidates_are_both_produced() {
        let registry = EncoderRegistry::new(
            Vec::new(),
            vec![csc("bgrx-to-yuv420p", PixelFormat::Yuv420p)],
            vec![encoder("x264", PixelFormat::Yuv420p, 70, 70)],
        );
        let candidates = registry.candidates("x264", PixelFormat::Bgrx);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].csc.is_some());
    }

    #[test]
    fn best_candidate_prefers_closer_quality_match() {
        let registry = EncoderRegistry::new(
            vec![],
            vec![],
            vec![
                encoder("x264-fast", PixelFormat::Yuv420p, 40, 90),
                encoder("x264-hq", PixelFormat::Yuv420p, 95, 40),
            ],
        );
        let best = registry
            .best_candidate("x264", PixelFormat::Yuv420p, 640, 480, 90, 50, 0, None)
            .unwrap();
        assert_eq!(best.encoder.name, "x264-hq");
    }

    #[test]
    fn tie_prefers_current_pipeline() {
        let registry = EncoderRegistry::new(
            vec![],
            vec![],
            vec![
                encoder("x264-a", PixelFormat::Yuv420p, 50, 50),
                encoder("x264-b", PixelFormat::Yuv420p, 50, 50),
            ],
        );
        let current = LivePipelineDescriptor {
            csc_name: None,
            encoder_name: "x264-b",
            width: 640,
            height: 480,
        };
        let best = registry
            .best_candidate("x264", PixelFormat::Yuv420p, 640, 480, 50, 50, 0, Some(current))
            .unwrap();
        assert_eq!(best.encoder.name, "x264-b");
    }

    #[test]
    fn below_min_quality_scores_zero_quality_component() {
        let registry = EncoderRegistry::new(vec![], vec![], vec![encoder("x264", PixelFormat::Yuv420p, 10, 50)]);
        let candidate = &registry.candidates("x264", PixelFormat::Yuv420p)[0];
        let score = registry.score(candidate, PixelFormat::Yuv420p, 80, 50, 50, None);
        assert_eq!(score.quality_score, 0.0);
    }

    #[test]
    fn fallback_lossless_still_prefers_cheapest_setup() {
        let cheap = StillEncoderSpec {
            name: "rgb24",
            accepted_formats: vec![PixelFormat::Rgb],
            quality: 100,
            speed: 80,
            setup_cost: 5,
            max_dimensions: None,
            lossless: true,
            construct: || Box::new(NoopStill),
        };
        let expensive = StillEncoderSpec {
            name: "png",
            accepted_formats: vec![PixelFormat::Rgb],
            quality: 100,
            speed: 20,
            setup_cost: 40,
            max_dimensions: None,
            lossless: true,
            construct: || Box::new(NoopStill),
        };
        let registry = EncoderRegistry::new(vec![expensive, cheap], vec![], vec![]);
        let fallback = registry.fallback_lossless_still(PixelFormat::Rgb).unwrap();
        assert_eq!(fallback.name, "rgb24");
    }
}
