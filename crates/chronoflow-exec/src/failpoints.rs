//! Named panic injection points (feature: `failpoints`).
//!
//! The macro expands to nothing unless the feature is enabled. When enabled,
//! a point panics while its name is armed with [`arm`].

#[cfg(feature = "failpoints")]
mod armed {
    use std::collections::HashSet;
    use std::sync::{Mutex, PoisonError};

    use once_cell::sync::Lazy;

    static ARMED: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

    pub fn arm(name: &str) {
        ARMED
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    pub fn disarm(name: &str) {
        ARMED
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    pub fn is_armed(name: &str) -> bool {
        ARMED
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

#[cfg(feature = "failpoints")]
pub use armed::{arm, disarm, is_armed};

#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {{
        if $crate::failpoints::is_armed($name) {
            panic!("failpoint triggered: {}", $name);
        }
    }};
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {{
        let _ = $name;
    }};
}
