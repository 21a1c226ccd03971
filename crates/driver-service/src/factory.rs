use driver_service_core::ProcessManagerFactory;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

impl ProcessManagerFactory for PlatformProcessManagerFactory {
    #[cfg(unix)]
    type Manager = driver_service_unix::UnixProcessManager;

    #[cfg(windows)]
    type Manager = driver_service_windows::WindowsProcessManager;

    fn create_process_manager() -> Self::Manager {
        #[cfg(unix)]
        return driver_service_unix::UnixProcessManagerFactory::create_process_manager();

        #[cfg(windows)]
        return driver_service_windows::WindowsProcessManagerFactory::create_process_manager();
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return driver_service_unix::UnixProcessManagerFactory::platform_name();

        #[cfg(windows)]
        return driver_service_windows::WindowsProcessManagerFactory::platform_name();
    }
}

/// Process manager type used on this platform
pub type PlatformProcessManager = <PlatformProcessManagerFactory as ProcessManagerFactory>::Manager;
