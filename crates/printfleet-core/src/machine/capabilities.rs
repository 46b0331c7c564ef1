//! Capability bitset.

flag_set! {
    /// Features a connected machine supports. Operations check the relevant
    /// flag before touching the vendor adapter.
    MachineCapabilities {
        /// Jobs stored on the machine can be started remotely.
        START_LOCAL_JOB = 1 << 1 => "StartLocalJob",
        /// Pause, resume, stop, and clear-bed.
        CONTROL = 1 << 2 => "Control",
        /// Light fixtures can be toggled.
        LIGHTING = 1 << 4 => "Lighting",
        /// Chamber air duct can switch between cooling and heating.
        AIR_DUCT = 1 << 5 => "AirDuct",
        /// Fan speeds are reported.
        FANS = 1 << 11 => "Fans",
        /// Camera streaming.
        OME = 1 << 12 => "OME",
        /// Nozzle information is reported.
        NOZZLES = 1 << 13 => "Nozzles",
        /// Finished jobs are recorded in the job history.
        PRINT_HISTORY = 1 << 14 => "PrintHistory",
        /// Files stored on the machine can be listed and downloaded.
        LOCAL_JOBS = 1 << 17 => "LocalJobs",
        /// Temperatures can be set.
        TEMPS = 1 << 19 => "Temps",
    }
}
