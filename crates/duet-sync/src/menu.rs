//! Placement of the per-message action menu.

/// Open below only when there is less than this much room above.
const MIN_SPACE_ABOVE: f64 = 170.0;

/// Flip horizontal alignment when the default side has less room than this.
const MIN_SPACE_SIDE: f64 = 210.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vertical {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub vertical: Vertical,
    pub align: Align,
}

/// Geometry of a message bubble and its scroll container, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MenuMetrics {
    pub container_top: f64,
    pub container_bottom: f64,
    pub container_left: f64,
    pub container_right: f64,
    pub bubble_top: f64,
    pub bubble_bottom: f64,
    pub bubble_left: f64,
    pub bubble_right: f64,
}

impl MenuMetrics {
    fn space_above(&self) -> f64 {
        self.bubble_top - self.container_top
    }

    fn space_below(&self) -> f64 {
        self.container_bottom - self.bubble_bottom
    }

    fn space_left(&self) -> f64 {
        self.bubble_left - self.container_left
    }

    fn space_right(&self) -> f64 {
        self.container_right - self.bubble_right
    }
}

/// Where to open the menu of a message. Own messages default to right
/// alignment, the partner's to left. Without metrics the default is used.
pub fn place_menu(metrics: Option<&MenuMetrics>, own_message: bool) -> Placement {
    let default_align = if own_message { Align::Right } else { Align::Left };
    let Some(m) = metrics else {
        return Placement {
            vertical: Vertical::Above,
            align: default_align,
        };
    };

    let (above, below) = (m.space_above(), m.space_below());
    let vertical = if above < MIN_SPACE_ABOVE && below > above {
        Vertical::Below
    } else {
        Vertical::Above
    };

    let (left, right) = (m.space_left(), m.space_right());
    let align = match default_align {
        Align::Right if right < MIN_SPACE_SIDE && left > right => Align::Left,
        Align::Left if left < MIN_SPACE_SIDE && right > left => Align::Right,
        keep => keep,
    };

    Placement { vertical, align }
}
