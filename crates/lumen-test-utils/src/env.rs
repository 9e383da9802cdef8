use std::ffi::OsString;

/// Environment variables overridden for the lifetime of the value.
///
/// Callers must hold whatever lock guards the variables they touch; the previous values are
/// put back in reverse order on drop.
#[derive(Debug, Default)]
pub struct EnvOverrides {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl EnvOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &'static str, value: &str) -> Self {
        self.remember(key);
        std::env::set_var(key, value);
        self
    }

    pub fn unset(mut self, key: &'static str) -> Self {
        self.remember(key);
        std::env::remove_var(key);
        self
    }

    fn remember(&mut self, key: &'static str) {
        if self.saved.iter().all(|(saved, _)| *saved != key) {
            self.saved.push((key, std::env::var_os(key)));
        }
    }
}

impl Drop for EnvOverrides {
    fn drop(&mut self) {
        for (key, prior) in self.saved.drain(..).rev() {
            match prior {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
    }
}
