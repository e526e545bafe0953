use std::sync::atomic::{AtomicBool, Ordering};

/// Read side of the application settings the core depends on.
pub trait SettingsProvider: Send + Sync {
    /// Global "silence all OS notifications" switch.
    fn silence_os_notifications(&self) -> bool;
}

/// In-memory settings, toggled by whatever owns the settings UI.
#[derive(Debug, Default)]
pub struct AppSettings {
    silence_os_notifications: AtomicBool,
}

impl AppSettings {
    pub fn new(silence_os_notifications: bool) -> Self {
        Self { silence_os_notifications: AtomicBool::new(silence_os_notifications) }
    }

    pub fn set_silence_os_notifications(&self, silence: bool) {
        self.silence_os_notifications.store(silence, Ordering::Relaxed);
    }
}

impl SettingsProvider for AppSettings {
    fn silence_os_notifications(&self) -> bool {
        self.silence_os_notifications.load(Ordering::Relaxed)
    }
}

/// The single notification decision: one-shot evaluations always notify,
/// otherwise the task must ask for it and notifications must not be silenced.
pub fn should_notify(is_one_shot: bool, settings: &dyn SettingsProvider, task_notify: bool) -> bool {
    is_one_shot || (!settings.silence_os_notifications() && task_notify)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_notify_table() {
        let loud = AppSettings::new(false);
        let silenced = AppSettings::new(true);

        assert!(should_notify(true, &silenced, false));
        assert!(should_notify(true, &loud, false));
        assert!(should_notify(false, &loud, true));
        assert!(!should_notify(false, &loud, false));
        assert!(!should_notify(false, &silenced, true));
    }

    #[test]
    fn test_toggle() {
        let settings = AppSettings::default();
        assert!(!settings.silence_os_notifications());
        settings.set_silence_os_notifications(true);
        assert!(settings.silence_os_notifications());
    }
}
