/// Long-press detector for the factory-reset input.
#[derive(Debug, Clone)]
pub struct ResetButton {
    hold_ms: u64,
    pressed_since_ms: Option<u64>,
    fired: bool,
}

impl ResetButton {
    pub fn new(hold_ms: u64) -> Self {
        Self {
            hold_ms,
            pressed_since_ms: None,
            fired: false,
        }
    }

    /// Feeds one sample; returns true once per press, when it has been held
    /// for at least the configured duration.
    pub fn update(&mut self, pressed: bool, now_ms: u64) -> bool {
        if !pressed {
            self.pressed_since_ms = None;
            self.fired = false;
            return false;
        }

        let since = *self.pressed_since_ms.get_or_insert(now_ms);
        if self.fired || now_ms.saturating_sub(since) < self.hold_ms {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed_since_ms.is_some()
    }
}
