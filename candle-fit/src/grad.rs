//! Thread-local switch for gradient tracking.
//!
//! The runner turns tracking off for evaluation passes. Models that build
//! extra autograd state can consult [`is_enabled`] to skip it.

use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

pub fn is_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Sets the flag until the returned guard is dropped, then restores the
/// previous value.
#[must_use = "gradient mode is restored as soon as the guard is dropped"]
pub fn set_enabled(enabled: bool) -> GradMode {
    let prev = GRAD_ENABLED.with(|flag| flag.replace(enabled));
    GradMode { prev }
}

pub struct GradMode {
    prev: bool,
}

impl Drop for GradMode {
    fn drop(&mut self) {
        GRAD_ENABLED.with(|flag| flag.set(self.prev));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_previous_value() {
        assert!(is_enabled());
        {
            let _off = set_enabled(false);
            assert!(!is_enabled());
            {
                let _on = set_enabled(true);
                assert!(is_enabled());
            }
            assert!(!is_enabled());
        }
        assert!(is_enabled());
    }
}
