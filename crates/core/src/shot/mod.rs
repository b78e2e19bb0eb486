/// Audio level at which an armed shot fires.
pub const FIRE_LEVEL: f64 = 1.0;

/// Outcome of feeding one audio value to a shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShotTransition {
    pub fire: bool,
    /// Armed flag to store and announce, if the step sets one.
    pub arm: Option<bool>,
}

/// Arm/disarm step for a shot receiving audio value `value`.
///
/// Only an exact peak fires an armed shot, and firing disarms it. A peak on a
/// disarmed shot changes nothing. Every other value arms the shot again, so a
/// held peak fires once.
pub fn on_audio(armed: bool, value: f64) -> ShotTransition {
    let peak = value == FIRE_LEVEL;
    match (peak, armed) {
        (true, true) => ShotTransition {
            fire: true,
            arm: Some(false),
        },
        (true, false) => ShotTransition {
            fire: false,
            arm: None,
        },
        (false, _) => ShotTransition {
            fire: false,
            arm: Some(true),
        },
    }
}
