//! Gate configuration and the pure half of admission: policy matching, the
//! authorizer state machine, context injection, and redirect locations.

mod authorize;
mod config;
mod context;
mod policy;
mod redirect;

pub use authorize::Ruling;
pub use config::{
    CONFIG_FILE, GateConfig, Pages, PlatformConfig, SessionSettings, SupabaseSettings, Timeouts,
    VerificationMode, default_config_dir, load_config_from_dir, load_config_from_file,
    parse_config, validate_config, write_default_config_files,
};
pub use context::inject;
pub use policy::{
    AccessPolicy, LabelClass, RouteRule, canonical_path, is_canonical_path, normalize_path,
};
pub use redirect::redirect_location;
