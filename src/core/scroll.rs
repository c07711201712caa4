//! Scroll follow policy for the message list
//!
//! Decides, on every content change, whether the list should follow the tail
//! or keep the reader's position. The rendering layer reports geometry; the
//! policy answers with a [`ScrollAction`].

use std::time::{Duration, Instant};

/// Default distance from the bottom that still counts as "at the bottom"
pub const DEFAULT_NEAR_BOTTOM_THRESHOLD: f32 = 100.0;
/// How long a programmatic scroll suppresses the new-content affordance
pub const DEFAULT_AUTO_SCROLL_GUARD: Duration = Duration::from_millis(300);

/// Scroll container geometry, in whatever units the renderer uses
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Viewport {
    /// Current scroll offset from the top
    pub scroll_top: f32,
    /// Total content height
    pub scroll_height: f32,
    /// Visible height of the container
    pub client_height: f32,
}

impl Viewport {
    pub fn new(scroll_top: f32, scroll_height: f32, client_height: f32) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    /// Largest reachable scroll offset
    pub fn max_scroll_top(&self) -> f32 {
        (self.scroll_height - self.client_height).max(0.0)
    }

    pub fn distance_from_bottom(&self) -> f32 {
        (self.max_scroll_top() - self.scroll_top).max(0.0)
    }
}

/// What the renderer should do after a content change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    /// Leave the scroll position alone
    None,
    /// Jump to the bottom without animation
    JumpToBottom,
    /// Animate to the bottom
    SmoothToBottom,
    /// Keep position and show the "new content below" affordance
    ShowNewContentIndicator,
}

impl ScrollAction {
    pub fn scrolls(&self) -> bool {
        matches!(self, ScrollAction::JumpToBottom | ScrollAction::SmoothToBottom)
    }
}

#[derive(Debug, Clone)]
pub struct ScrollPolicy {
    threshold: f32,
    guard: Duration,
    viewport: Viewport,
    /// End of the current programmatic scroll window
    auto_scroll_until: Option<Instant>,
    show_new_content: bool,
}

impl Default for ScrollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_NEAR_BOTTOM_THRESHOLD, DEFAULT_AUTO_SCROLL_GUARD)
    }
}

impl ScrollPolicy {
    pub fn new(threshold: f32, guard: Duration) -> Self {
        Self {
            threshold,
            guard,
            viewport: Viewport::default(),
            auto_scroll_until: None,
            show_new_content: false,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn is_near_bottom(&self, viewport: &Viewport) -> bool {
        viewport.distance_from_bottom() <= self.threshold
    }

    /// Core follow decision
    ///
    /// A conversation switch always scrolls; a new trailing message only when
    /// the last known viewport was near the bottom.
    pub fn should_auto_scroll(
        &self,
        is_new_conversation: bool,
        has_new_trailing_message: bool,
    ) -> bool {
        if is_new_conversation {
            return true;
        }
        has_new_trailing_message && self.is_near_bottom(&self.viewport)
    }

    /// Whether a programmatic scroll is still settling
    pub fn is_auto_scrolling(&self, now: Instant) -> bool {
        self.auto_scroll_until.is_some_and(|until| now < until)
    }

    pub fn new_content_visible(&self) -> bool {
        self.show_new_content
    }

    /// Record the container geometry after a render (content size change)
    pub fn observe_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Scroll event from the container
    ///
    /// Reaching the bottom by hand hides the affordance. Events fired while a
    /// programmatic scroll settles never re-show it.
    pub fn on_user_scroll(&mut self, viewport: Viewport, now: Instant) {
        self.viewport = viewport;
        if self.is_auto_scrolling(now) {
            return;
        }
        self.auto_scroll_until = None;
        if self.is_near_bottom(&viewport) {
            self.show_new_content = false;
        }
    }

    /// Active conversation changed
    pub fn on_conversation_switched(&mut self, now: Instant) -> ScrollAction {
        self.show_new_content = false;
        self.begin_programmatic_scroll(now);
        ScrollAction::JumpToBottom
    }

    /// The confirmed message list changed
    ///
    /// While a programmatic scroll settles the viewport is mid-animation, so
    /// a far-from-bottom reading there never raises the affordance.
    pub fn on_messages_changed(
        &mut self,
        has_new_trailing_message: bool,
        now: Instant,
    ) -> ScrollAction {
        if !has_new_trailing_message {
            return ScrollAction::None;
        }
        if self.should_auto_scroll(false, true) {
            self.begin_programmatic_scroll(now);
            ScrollAction::SmoothToBottom
        } else if self.is_auto_scrolling(now) {
            ScrollAction::None
        } else {
            self.show_new_content = true;
            ScrollAction::ShowNewContentIndicator
        }
    }

    /// The streaming draft grew by one delta
    ///
    /// Re-checks the viewport on every delta so a reader who scrolled up
    /// mid-stream is left alone.
    pub fn on_draft_growth(&mut self, now: Instant) -> ScrollAction {
        if self.is_near_bottom(&self.viewport) {
            self.begin_programmatic_scroll(now);
            ScrollAction::SmoothToBottom
        } else if self.is_auto_scrolling(now) {
            ScrollAction::None
        } else {
            self.show_new_content = true;
            ScrollAction::ShowNewContentIndicator
        }
    }

    /// Affordance clicked: follow the tail again
    pub fn jump_to_latest(&mut self, now: Instant) -> ScrollAction {
        self.show_new_content = false;
        self.begin_programmatic_scroll(now);
        ScrollAction::SmoothToBottom
    }

    fn begin_programmatic_scroll(&mut self, now: Instant) {
        self.auto_scroll_until = Some(now + self.guard);
        // Assume the renderer honours the scroll; the next observation corrects it.
        self.viewport.scroll_top = self.viewport.max_scroll_top();
    }
}
