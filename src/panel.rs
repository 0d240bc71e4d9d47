//! Floating panel placement and drag handling
//!
//! A panel sits just outside the editing surface, level with the text that
//! produced it. Once the user drags it, the dragged position wins over the
//! anchor until the panel is closed.

use crate::annotations::AnnotationId;
use crate::config::EngineConfig;

/// Side length of the close control in the panel's top-right corner.
const CLOSE_CONTROL_SIZE: f64 = 24.0;

/// Side length of a collapsed suggestion indicator.
const INDICATOR_SIZE: f64 = 28.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.left && p.x <= self.right() && p.y >= self.top && p.y <= self.bottom()
    }
}

/// Where a panel attaches when it has not been dragged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelAnchor {
    pub top: f64,
    pub editor_right: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelPosition {
    pub anchor: PanelAnchor,
    pub drag_override: Option<Point>,
}

/// Which part of a panel a point hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelTarget {
    Body,
    CloseControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    Keep,
    Close,
}

/// Placement rules shared by every panel of an engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelLayout {
    pub gutter: f64,
    pub width: f64,
    pub height: f64,
    /// Visible area. Without one, panels always go to the right.
    pub viewport: Option<Rect>,
}

impl PanelLayout {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            gutter: config.panel_gutter,
            width: config.panel_width,
            height: config.panel_height,
            viewport: None,
        }
    }

    pub fn with_viewport(mut self, viewport: Rect) -> Self {
        self.viewport = Some(viewport);
        self
    }

    /// Anchored top-left corner for a panel.
    ///
    /// Prefers the right of the editing surface. Flips to the left when the
    /// right side would overflow the viewport and the left side has room.
    pub fn place(&self, anchor: PanelAnchor, editor: Rect) -> Point {
        let mut x = anchor.editor_right + self.gutter;
        let mut y = anchor.top;

        if let Some(view) = self.viewport {
            if x + self.width > view.right() {
                let left = editor.left - self.gutter - self.width;
                if left >= view.left {
                    x = left;
                }
            }
            let max_y = (view.bottom() - self.height).max(view.top);
            y = y.clamp(view.top, max_y);
        }

        Point::new(x, y)
    }

    /// Full panel frame at the anchored position.
    pub fn frame(&self, anchor: PanelAnchor, editor: Rect) -> Rect {
        let origin = self.place(anchor, editor);
        Rect::new(origin.x, origin.y, self.width, self.height)
    }

    /// Collapsed indicator, in the corner where the full panel would open.
    pub fn indicator_frame(&self, anchor: PanelAnchor, editor: Rect) -> Rect {
        let origin = self.place(anchor, editor);
        Rect::new(origin.x, origin.y, INDICATOR_SIZE, INDICATOR_SIZE)
    }
}

/// One open panel showing an annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatingPanel {
    pub annotation: AnnotationId,
    pub position: PanelPosition,
    grab: Option<Point>,
}

impl FloatingPanel {
    pub fn new(annotation: AnnotationId, anchor: PanelAnchor) -> Self {
        Self {
            annotation,
            position: PanelPosition {
                anchor,
                drag_override: None,
            },
            grab: None,
        }
    }

    /// Refresh the anchor after scroll, resize or content change. A dragged
    /// panel stays where the user put it.
    pub fn set_anchor(&mut self, anchor: PanelAnchor) {
        self.position.anchor = anchor;
    }

    pub fn origin(&self, layout: &PanelLayout, editor: Rect) -> Point {
        self.position
            .drag_override
            .unwrap_or_else(|| layout.place(self.position.anchor, editor))
    }

    pub fn frame(&self, layout: &PanelLayout, editor: Rect) -> Rect {
        let origin = self.origin(layout, editor);
        Rect::new(origin.x, origin.y, layout.width, layout.height)
    }

    pub fn hit_test(&self, p: Point, layout: &PanelLayout, editor: Rect) -> Option<PanelTarget> {
        let frame = self.frame(layout, editor);
        if !frame.contains(p) {
            return None;
        }
        let close = Rect::new(
            frame.right() - CLOSE_CONTROL_SIZE,
            frame.top,
            CLOSE_CONTROL_SIZE,
            CLOSE_CONTROL_SIZE,
        );
        if close.contains(p) {
            Some(PanelTarget::CloseControl)
        } else {
            Some(PanelTarget::Body)
        }
    }

    /// Start a drag if `p` lands on the panel body. Returns whether a drag
    /// started.
    pub fn pointer_down(&mut self, p: Point, layout: &PanelLayout, editor: Rect) -> bool {
        if self.hit_test(p, layout, editor) != Some(PanelTarget::Body) {
            return false;
        }
        let origin = self.origin(layout, editor);
        self.grab = Some(Point::new(p.x - origin.x, p.y - origin.y));
        true
    }

    /// Follow the pointer while dragging. Returns the new origin.
    pub fn pointer_move(&mut self, p: Point) -> Option<Point> {
        let grab = self.grab?;
        let origin = Point::new(p.x - grab.x, p.y - grab.y);
        self.position.drag_override = Some(origin);
        Some(origin)
    }

    pub fn pointer_up(&mut self) {
        self.grab = None;
    }

    pub fn is_dragging(&self) -> bool {
        self.grab.is_some()
    }

    /// Clicks inside the panel or the editing surface keep the panel open.
    pub fn click_outcome(&self, p: Point, layout: &PanelLayout, editor: Rect) -> ClickOutcome {
        if self.frame(layout, editor).contains(p) || editor.contains(p) {
            ClickOutcome::Keep
        } else {
            ClickOutcome::Close
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn layout() -> PanelLayout {
        PanelLayout {
            gutter: 16.0,
            width: 300.0,
            height: 200.0,
            viewport: None,
        }
    }

    fn editor() -> Rect {
        Rect::new(100.0, 50.0, 600.0, 800.0)
    }

    fn anchor(top: f64) -> PanelAnchor {
        PanelAnchor {
            top,
            editor_right: editor().right(),
        }
    }

    #[test]
    fn places_panel_right_of_editor_with_gutter() {
        let panel = FloatingPanel::new(Uuid::new_v4(), anchor(120.0));
        assert_eq!(panel.origin(&layout(), editor()), Point::new(716.0, 120.0));
    }

    #[test]
    fn flips_left_when_right_side_overflows_viewport() {
        let layout = PanelLayout {
            gutter: 16.0,
            width: 80.0,
            height: 200.0,
            viewport: Some(Rect::new(0.0, 0.0, 760.0, 1000.0)),
        };
        let point = layout.place(anchor(120.0), editor());
        assert_eq!(point, Point::new(4.0, 120.0));
    }

    #[test]
    fn indicator_sits_where_the_panel_opens() {
        let layout = layout();
        let indicator = layout.indicator_frame(anchor(120.0), editor());
        let full = layout.frame(anchor(120.0), editor());
        assert_eq!((indicator.left, indicator.top), (full.left, full.top));
        assert_eq!(indicator.width, INDICATOR_SIZE);
        assert_eq!(full.width, 300.0);
        assert!(!indicator.contains(Point::new(900.0, 300.0)));
        assert!(full.contains(Point::new(900.0, 300.0)));
    }

    #[test]
    fn clamps_vertically_into_viewport() {
        let layout = layout().with_viewport(Rect::new(0.0, 0.0, 2000.0, 500.0));
        let point = layout.place(anchor(450.0), editor());
        assert_eq!(point.y, 300.0);
    }

    #[test]
    fn drag_overrides_anchor_until_closed() {
        let layout = layout();
        let mut panel = FloatingPanel::new(Uuid::new_v4(), anchor(120.0));

        assert!(panel.pointer_down(Point::new(730.0, 150.0), &layout, editor()));
        assert!(panel.is_dragging());
        let moved = panel.pointer_move(Point::new(530.0, 450.0)).unwrap();
        assert_eq!(moved, Point::new(516.0, 420.0));
        panel.pointer_up();
        assert!(!panel.is_dragging());

        panel.set_anchor(anchor(10.0));
        assert_eq!(panel.origin(&layout, editor()), Point::new(516.0, 420.0));
        assert!(panel.pointer_move(Point::new(0.0, 0.0)).is_none());
    }

    #[test]
    fn close_control_does_not_start_a_drag() {
        let layout = layout();
        let mut panel = FloatingPanel::new(Uuid::new_v4(), anchor(120.0));
        let close = Point::new(716.0 + 300.0 - 5.0, 125.0);
        assert_eq!(
            panel.hit_test(close, &layout, editor()),
            Some(PanelTarget::CloseControl)
        );
        assert!(!panel.pointer_down(close, &layout, editor()));
    }

    #[test]
    fn clicks_in_editor_keep_panel_open() {
        let layout = layout();
        let panel = FloatingPanel::new(Uuid::new_v4(), anchor(120.0));
        assert_eq!(
            panel.click_outcome(Point::new(200.0, 200.0), &layout, editor()),
            ClickOutcome::Keep
        );
        assert_eq!(
            panel.click_outcome(Point::new(800.0, 200.0), &layout, editor()),
            ClickOutcome::Keep
        );
        assert_eq!(
            panel.click_outcome(Point::new(20.0, 20.0), &layout, editor()),
            ClickOutcome::Close
        );
    }
}
