//! Still/video encoder registry, CSC+encoder pipeline scoring, the encoding
//! selector, and the still encoders themselves (png, jpeg, rgb24/rgb32,
//! webp). This is the crate that turns a decision ("use x264" / "use png")
//! into actual compressed bytes.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod csc;
mod error;
mod pipeline;
mod registry;
mod selector;
mod spec;
mod still;
mod video;

pub use csc::default_cscs;
pub use error::{CodecError, Result};
pub use pipeline::{choose_scale, client_options_for, EncodeOptions, EncodeOutput, ScaleFactor, VideoPipeline};
pub use registry::{CandidateScore, EncoderRegistry, LivePipelineDescriptor, PipelineCandidate};
pub use selector::{is_video_encoding, select, split_for_video, EncodingChoice, EncodingPlanItem, SelectorConfig, SelectorContext};
pub use spec::{CscConverter, CscSpec, EncodeParams, StillEncoder, StillEncoderSpec, VideoEncoderImpl, VideoEncoderSpec};
pub use still::default_still_encoders;
pub use video::default_video_encoders;
