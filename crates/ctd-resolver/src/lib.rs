pub mod apps_config;
pub mod context;
pub mod flag;
pub mod loader;
pub mod overrides;
pub mod resolver;
pub mod types;

pub use apps_config::build_apps_config;
pub use context::{build_instance_context, InstanceContext};
pub use flag::{flag_secret_name, generate_db_credentials, generate_flag, DbCredentials};
pub use loader::CtdLoader;
pub use resolver::resolve;
pub use types::{Cdf, CdfComponent, CdfMetadata, Ctd, CtdContainer, ResolvedObject};
