mod settings;

pub use settings::{
    ApiSettings, IdentitySettings, RealtimeSettings, RetrySettings, Settings, CONFIG_PATH_ENV,
    ENV_PREFIX,
};
