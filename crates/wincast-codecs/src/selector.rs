//! The encoding selector: a pure function from window traits, region and
//! history to a concrete encoding choice for the next region.

use wincast_types::{Region, WindowTraits};

/// Names a video encoding. Only `"x264"` is wired up by
/// [`crate::video::default_video_encoders`] but the selector's decision
/// table treats any name in this set the same way.
#[must_use]
pub fn is_video_encoding(name: &str) -> bool {
    matches!(name, "x264" | "vpx")
}

/// What the selector decided for one region: either stick with / switch to
/// a named still encoding, or keep using the video pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingChoice<'a> {
    Still(&'a str),
    Video,
}

/// Tunables the decision table reads. `×128` is applied by the caller (via
/// [`SelectorConfig::effective_nonvideo_pixels`]) when batching is off.
#[derive(Debug, Clone, Copy)]
pub struct SelectorConfig<'a> {
    pub lossless_still: &'a str,
    pub alpha_capable_still: &'a str,
    pub tray_still: &'a str,
    pub max_nonvideo_pixels: u64,
    /// Also the pixel-count threshold below which the *first* frame of an
    /// override-redirect window defers video pipeline setup entirely.
    pub max_nonvideo_or_initial_pixels: u64,
}

impl Default for SelectorConfig<'static> {
    fn default() -> Self {
        Self {
            lossless_still: "png",
            alpha_capable_still: "png",
            tray_still: "png",
            max_nonvideo_pixels: 2048,
            max_nonvideo_or_initial_pixels: 64 * 1024,
        }
    }
}

impl<'a> SelectorConfig<'a> {
    /// `max_nonvideo_pixels`/`max_nonvideo_or_initial_pixels`, scaled ×128
    /// when `batching` is `false` - stay much more generous about keeping
    /// a window off video while it isn't even batching yet.
    #[must_use]
    pub fn effective_nonvideo_pixels(&self, batching: bool) -> (u64, u64) {
        if batching {
            (self.max_nonvideo_pixels, self.max_nonvideo_or_initial_pixels)
        } else {
            (self.max_nonvideo_pixels * 128, self.max_nonvideo_or_initial_pixels * 128)
        }
    }
}

/// Everything the decision table reads about the current region and the
/// window it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct SelectorContext<'a> {
    pub traits: WindowTraits,
    pub region: Region,
    pub window_width: u32,
    pub window_height: u32,
    pub current_encoding: &'a str,
    pub image_has_alpha: bool,
    pub current_encoding_has_alpha: bool,
    pub is_first_frame: bool,
    pub batching: bool,
}

/// Runs the encoding decision table, in priority order - the first
/// matching row wins.
#[must_use]
pub fn select<'a>(ctx: &SelectorContext<'_>, config: &SelectorConfig<'a>) -> EncodingChoice<'a> {
    let region_pixels = ctx.region.area();
    let window_area = u64::from(ctx.window_width) * u64::from(ctx.window_height);
    let coverage = if window_area == 0 {
        0.0
    } else {
        region_pixels as f64 / window_area as f64
    };
    let (max_nonvideo, max_nonvideo_or_initial) = config.effective_nonvideo_pixels(ctx.batching);

    if ctx.image_has_alpha && !ctx.current_encoding_has_alpha {
        return EncodingChoice::Still(config.alpha_capable_still);
    }
    if ctx.traits.is_tray {
        return EncodingChoice::Still(config.tray_still);
    }
    if !is_video_encoding(ctx.current_encoding) {
        return EncodingChoice::Still(ctx.current_encoding);
    }
    if ctx.traits.is_override_redirect && ctx.is_first_frame && region_pixels <= max_nonvideo_or_initial {
        return EncodingChoice::Still(config.lossless_still);
    }
    if ctx.region.width < 8 || ctx.region.height <= 2 {
        return EncodingChoice::Still(config.lossless_still);
    }
    if coverage < 0.01 {
        return EncodingChoice::Still(config.lossless_still);
    }
    if region_pixels > max_nonvideo {
        return EncodingChoice::Video;
    }
    if coverage < 0.5 && !ctx.batching {
        return EncodingChoice::Still(config.lossless_still);
    }
    EncodingChoice::Video
}

/// One rectangle paired with the encoding it should be sent with, the
/// output of [`split_for_video`] when a region needs x264's odd-dimension
/// workaround.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingPlanItem<'a> {
    pub region: Region,
    pub choice: EncodingChoice<'a>,
}

/// x264 requires even width and height. When `region` has an odd width or
/// height, splits it into an even-sized video portion plus lossless-still
/// strips covering the leftover row/column, per the corrected edge-case
/// behavior: a 1-pixel-wide strip spanning the full height for odd width,
/// and a full-width, 1-pixel-tall strip for odd height.
#[must_use]
pub fn split_for_video<'a>(region: Region, lossless_still: &'a str) -> Vec<EncodingPlanItem<'a>> {
    let odd_width = region.width % 2 != 0;
    let odd_height = region.height % 2 != 0;
    if !odd_width && !odd_height {
        return vec![EncodingPlanItem {
            region,
            choice: EncodingChoice::Video,
        }];
    }

    let even_width = region.width - u32::from(odd_width);
    let even_height = region.height - u32::from(odd_height);
    let mut plan = vec![EncodingPlanItem {
        region: Region::new(region.x, region.y, even_width, even_height),
        choice: EncodingChoice::Video,
    }];
    if odd_width {
        plan.push(EncodingPlanItem {
            region: Region::new(region.x + even_width as i32, region.y, 1, region.height),
            choice: EncodingChoice::Still(lossless_still),
        });
    }
    if odd_height {
        plan.push(EncodingPlanItem {
            region: Region::new(region.x, region.y + even_height as i32, region.width, 1),
            choice: EncodingChoice::Still(lossless_still),
        });
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_ctx() -> SelectorContext<'static> {
        SelectorContext {
            traits: WindowTraits::default(),
            region: Region::new(0, 0, 800, 600),
            window_width: 800,
            window_height: 600,
            current_encoding: "x264",
            image_has_alpha: false,
            current_encoding_has_alpha: false,
            is_first_frame: false,
            batching: true,
        }
    }

    #[test]
    fn alpha_mismatch_switches_to_alpha_capable_still() {
        let mut ctx = base_ctx();
        ctx.image_has_alpha = true;
        let choice = select(&ctx, &SelectorConfig::default());
        assert_eq!(choice, EncodingChoice::Still("png"));
    }

    #[test]
    fn tray_always_goes_lossless_still() {
        let mut ctx = base_ctx();
        ctx.traits.is_tray = true;
        let choice = select(&ctx, &SelectorConfig::default());
        assert_eq!(choice, EncodingChoice::Still("png"));
    }

    #[test]
    fn non_video_current_encoding_is_kept() {
        let mut ctx = base_ctx();
        ctx.current_encoding = "jpeg";
        let choice = select(&ctx, &SelectorConfig::default());
        assert_eq!(choice, EncodingChoice::Still("jpeg"));
    }

    #[test]
    fn large_coverage_keeps_video() {
        let mut ctx = base_ctx();
        ctx.region = Region::new(0, 0, 800, 570); // ~95% coverage
        let choice = select(&ctx, &SelectorConfig::default());
        assert_eq!(choice, EncodingChoice::Video);
    }

    #[test]
    fn small_coverage_without_batching_goes_still() {
        let mut ctx = base_ctx();
        ctx.batching = false;
        ctx.region = Region::new(0, 0, 100, 100); // well under 50% of 800x600
        let choice = select(&ctx, &SelectorConfig::default());
        assert_eq!(choice, EncodingChoice::Still("png"));
    }

    #[test]
    fn tiny_region_below_one_percent_goes_still() {
        let mut ctx = base_ctx();
        ctx.region = Region::new(0, 0, 10, 10);
        let choice = select(&ctx, &SelectorConfig::default());
        assert_eq!(choice, EncodingChoice::Still("png"));
    }

    #[test]
    fn unsuitable_scaler_dimensions_go_still() {
        let mut ctx = base_ctx();
        ctx.region = Region::new(0, 0, 4, 600);
        let choice = select(&ctx, &SelectorConfig::default());
        assert_eq!(choice, EncodingChoice::Still("png"));
    }

    #[test]
    fn even_region_is_not_split() {
        let plan = split_for_video(Region::new(0, 0, 100, 50), "png");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].choice, EncodingChoice::Video);
    }

    #[test]
    fn odd_width_and_height_produce_three_pieces() {
        let plan = split_for_video(Region::new(0, 0, 101, 51), "png");
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].region, Region::new(0, 0, 100, 50));
        assert_eq!(plan[0].choice, EncodingChoice::Video);
        assert_eq!(plan[1].region, Region::new(100, 0, 1, 51));
        assert_eq!(plan[1].choice, EncodingChoice::Still("png"));
        assert_eq!(plan[2].region, Region::new(0, 50, 101, 1));
        assert_eq!(plan[2].choice, EncodingChoice::Still("png"));
    }
}
