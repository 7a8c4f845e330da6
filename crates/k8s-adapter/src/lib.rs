pub mod adapter;
pub mod client;
pub mod pod_status;
pub mod redblue;
pub mod security;

pub use adapter::{KubernetesAdapter, CHALLENGE_LABEL, CHALLENGE_LABEL_VALUE};
pub use client::build_client;
pub use pod_status::{standardize_pod_status, PodStatus};
pub use redblue::RedBlueHandler;
