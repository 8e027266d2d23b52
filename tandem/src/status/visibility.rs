//! Viewport geometry for read detection.
//!
//! A message counts as seen once enough of its rendered box overlaps the
//! viewport. The bottom of the viewport is shrunk by a margin so a message
//! peeking in under a composer bar does not count.

use tandem_proto::message::MessageId;

/// Fraction of a message that must be visible to mark it read.
pub const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.5;

/// Pixels trimmed from the bottom of the viewport.
pub const DEFAULT_BOTTOM_MARGIN: f64 = 50.0;

/// Vertical extent of a rendered box, in pixels from the top of the
/// scroll container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    /// Top edge.
    pub top: f64,
    /// Height; zero or negative heights are treated as invisible.
    pub height: f64,
}

impl Span {
    /// Creates a span.
    #[must_use]
    pub const fn new(top: f64, height: f64) -> Self {
        Self { top, height }
    }

    const fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// The visible window of the scroll container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Visible area.
    pub span: Span,
    /// Pixels trimmed from the bottom before intersecting.
    pub bottom_margin: f64,
}

impl Viewport {
    /// Creates a viewport with the default bottom margin.
    #[must_use]
    pub const fn new(top: f64, height: f64) -> Self {
        Self {
            span: Span::new(top, height),
            bottom_margin: DEFAULT_BOTTOM_MARGIN,
        }
    }

    /// Fraction of `element` inside the trimmed viewport, in `[0, 1]`.
    #[must_use]
    pub fn intersection_ratio(&self, element: Span) -> f64 {
        if element.height <= 0.0 {
            return 0.0;
        }
        let view_top = self.span.top;
        let view_bottom = (self.span.bottom() - self.bottom_margin).max(view_top);
        let overlap = element.bottom().min(view_bottom) - element.top.max(view_top);
        (overlap.max(0.0) / element.height).clamp(0.0, 1.0)
    }
}

/// One observation of a rendered message.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityEntry {
    /// Observed message.
    pub message_id: MessageId,
    /// Visible fraction in `[0, 1]`.
    pub ratio: f64,
}

impl VisibilityEntry {
    /// Creates an entry from a precomputed ratio.
    #[must_use]
    pub const fn new(message_id: MessageId, ratio: f64) -> Self {
        Self { message_id, ratio }
    }

    /// Creates an entry by intersecting `element` with `viewport`.
    #[must_use]
    pub fn measure(message_id: MessageId, element: Span, viewport: &Viewport) -> Self {
        Self {
            message_id,
            ratio: viewport.intersection_ratio(element),
        }
    }
}
