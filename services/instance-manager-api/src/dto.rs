use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Deserialize)]
pub struct StartChallengeRequest {
    pub user_id: String,
    pub cdf_content: Value,
    pub competition_id: String,
    pub deployment_name: String,
    pub user_role: Option<String>,
}

#[derive(Serialize)]
pub struct StartChallengeResponse {
    pub success: bool,
    pub queued: bool,
    pub task_id: String,
    pub queue_position: i64,
    pub priority: &'static str,
    pub status: &'static str,
}

#[derive(Deserialize)]
pub struct EndChallengeRequest {
    pub deployment_name: String,
    pub namespace: Option<String>,
    pub user_id: Option<String>,
    pub user_role: Option<String>,
}

#[derive(Serialize)]
pub struct EndChallengeResponse {
    pub success: bool,
    pub message: String,
    pub task_id: String,
    pub status: &'static str,
}

#[derive(Deserialize)]
pub struct GetPodStatusQuery {
    pub pod_name: String,
    pub namespace: Option<String>,
}

#[derive(Deserialize)]
pub struct GetSecretRequest {
    pub secret_name: String,
    pub namespace: Option<String>,
}

#[derive(Serialize)]
pub struct GetSecretResponse {
    pub secret_value: String,
}

#[derive(Deserialize)]
pub struct RecentDeploymentsQuery {
    pub limit: Option<isize>,
}

#[derive(Deserialize)]
pub struct WorkerActionRequest {
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct ChallengePodSummary {
    pub name: String,
    pub status: &'static str,
    pub user_id: Option<String>,
    pub competition_id: Option<String>,
    pub challenge_type: Option<String>,
    pub challenge_name: Option<String>,
    pub urls: ChallengePodUrls,
    pub flag_secret_name: String,
}

#[derive(Serialize)]
pub struct ChallengePodUrls {
    pub terminal: Option<String>,
    pub challenge: Option<String>,
}

#[derive(Serialize)]
pub struct UploadCtdResponse {
    pub type_name: String,
    pub version: Option<String>,
    pub supporting_files: Vec<String>,
    pub is_update: bool,
}
