/// Declares all environment variables read by `taskgate` and its crates.
pub struct EnvVars;

impl EnvVars {
    /// Path to the `taskgate.toml` settings file. When unset, the service reads
    /// `/etc/taskgate/taskgate.toml` and falls back to built-in defaults if that file is absent.
    pub const TASKGATE_CONFIG_FILE: &'static str = "TASKGATE_CONFIG_FILE";

    /// Overrides the `policy` setting. Accepts `legacy` or `current`.
    pub const TASKGATE_POLICY: &'static str = "TASKGATE_POLICY";

    /// Overrides the `grantee-uid` setting, i.e., the uid of the transfer executor that receives
    /// access-control grants.
    pub const TASKGATE_GRANTEE_UID: &'static str = "TASKGATE_GRANTEE_UID";

    /// A `tracing` filter directive (e.g., `taskgate_acl=trace`). Takes precedence over the level
    /// passed to `setup_logging`.
    pub const TASKGATE_LOG: &'static str = "TASKGATE_LOG";

    /// Used to disable colored log output.
    pub const NO_COLOR: &'static str = "NO_COLOR";
}
