use serde::Serialize;
use serde_json::Value;
use shared::{AppError, RedisClient};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::phase::Phase;
use crate::tracker::DeploymentTracker;

const TRACKERS_KEY: &str = "perf_monitor:trackers";
const RECENT_KEY: &str = "perf_monitor:recent";
const METRICS_KEY: &str = "perf_monitor:metrics";
const MAX_SAMPLES: isize = 1000;

fn type_durations_key(challenge_type: &str) -> String {
    format!("perf_monitor:durations:type:{challenge_type}")
}

fn phase_durations_key(phase: Phase) -> String {
    format!("perf_monitor:durations:phase:{}", phase.as_str())
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DurationStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct / 100.0) * (sorted.len() as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

fn duration_stats(mut samples: Vec<f64>) -> DurationStats {
    if samples.is_empty() {
        return DurationStats::default();
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let count = samples.len() as u64;
    let sum: f64 = samples.iter().sum();
    DurationStats {
        count,
        min: samples[0],
        max: samples[samples.len() - 1],
        mean: sum / count as f64,
        p50: percentile(&samples, 50.0),
        p95: percentile(&samples, 95.0),
        p99: percentile(&samples, 99.0),
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PerformanceMetrics {
    pub total_tracked: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub duration_stats: DurationStats,
    pub by_challenge_type: HashMap<String, DurationStats>,
    pub by_phase: HashMap<String, DurationStats>,
}

/// System-wide performance tracking: an in-memory cache of in-flight
/// trackers plus Redis-backed history for completed ones. Mirrors the
/// split between live phase timers and the aggregate metrics a dashboard
/// would query.
#[derive(Clone)]
pub struct PerformanceMonitor {
    redis: RedisClient,
    trackers: std::sync::Arc<tokio::sync::RwLock<HashMap<String, DeploymentTracker>>>,
}

impl PerformanceMonitor {
    pub fn new(redis: RedisClient) -> Self {
        Self {
            redis,
            trackers: std::sync::Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    pub async fn start_tracking(&self, task_id: &str, user_id: Option<String>, challenge_type: Option<String>) -> DeploymentTracker {
        let tracker = DeploymentTracker::new(task_id.to_string(), user_id, challenge_type);
        self.trackers.write().await.insert(task_id.to_string(), tracker.clone());
        tracker
    }

    pub async fn get_tracker(&self, task_id: &str) -> Option<DeploymentTracker> {
        self.trackers.read().await.get(task_id).cloned()
    }

    pub async fn start_phase(&self, task_id: &str, phase: Phase) -> Result<(), AppError> {
        let mut trackers = self.trackers.write().await;
        let Some(tracker) = trackers.get_mut(task_id) else {
            warn!(task_id, "start_phase called for unknown tracker");
            return Ok(());
        };
        tracker.start_phase(phase.as_str());
        Ok(())
    }

    pub async fn end_phase(&self, task_id: &str) -> Result<f64, AppError> {
        let mut trackers = self.trackers.write().await;
        let Some(tracker) = trackers.get_mut(task_id) else {
            warn!(task_id, "end_phase called for unknown tracker");
            return Ok(0.0);
        };
        Ok(tracker.end_phase())
    }

    pub async fn add_tag(&self, task_id: &str, key: &str, value: Value) -> Result<(), AppError> {
        let mut trackers = self.trackers.write().await;
        if let Some(tracker) = trackers.get_mut(task_id) {
            tracker.add_tag(key, value);
        }
        Ok(())
    }

    /// Ends tracking for `task_id`, persists the record to Redis, updates
    /// rolling per-type and per-phase duration samples, and bumps the
    /// success/failure counters. Returns the total duration in seconds.
    pub async fn complete_tracking(&self, task_id: &str, success: bool) -> Result<f64, AppError> {
        let tracker = {
            let mut trackers = self.trackers.write().await;
            let Some(mut tracker) = trackers.remove(task_id) else {
                warn!(task_id, "complete_tracking called for unknown tracker");
                return Ok(0.0);
            };
            tracker.complete();
            tracker
        };

        let total_duration = tracker.end_time.unwrap_or(tracker.start_time) - tracker.start_time;
        let blob = serde_json::to_string(&tracker)?;
        let task_id_owned = task_id.to_string();
        let challenge_type = tracker.challenge_type.clone();
        let phase_durations: Vec<(String, f64)> = tracker
            .phases
            .iter()
            .map(|(phase, record)| (phase.clone(), record.duration))
            .collect();

        self.redis
            .execute(move |mut conn| {
                let blob = blob.clone();
                let task_id = task_id_owned.clone();
                let challenge_type = challenge_type.clone();
                let phase_durations = phase_durations.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    pipe.cmd("HSET").arg(TRACKERS_KEY).arg(&task_id).arg(&blob);
                    pipe.cmd("ZADD").arg(RECENT_KEY).arg(chrono::Utc::now().timestamp()).arg(&task_id);
                    pipe.cmd("ZREMRANGEBYRANK").arg(RECENT_KEY).arg(0).arg(-(MAX_SAMPLES + 1));
                    pipe.cmd("HINCRBY").arg(METRICS_KEY).arg("total_tracked").arg(1);
                    pipe.cmd("HINCRBY").arg(METRICS_KEY).arg(if success { "success_count" } else { "failure_count" }).arg(1);
                    pipe.cmd("ZADD").arg("perf_monitor:durations:total").arg(total_duration).arg(&task_id);
                    pipe.cmd("ZREMRANGEBYRANK").arg("perf_monitor:durations:total").arg(0).arg(-(MAX_SAMPLES + 1));

                    if let Some(challenge_type) = &challenge_type {
                        let key = type_durations_key(challenge_type);
                        pipe.cmd("ZADD").arg(&key).arg(total_duration).arg(&task_id);
                        pipe.cmd("ZREMRANGEBYRANK").arg(&key).arg(0).arg(-(MAX_SAMPLES + 1));
                    }

                    for (phase, duration) in &phase_durations {
                        let key = format!("perf_monitor:durations:phase:{phase}");
                        pipe.cmd("ZADD").arg(&key).arg(*duration).arg(&task_id);
                        pipe.cmd("ZREMRANGEBYRANK").arg(&key).arg(0).arg(-(MAX_SAMPLES + 1));
                    }

                    pipe.query_async::<()>(&mut conn).await
                }
            })
            .await?;

        debug!(task_id, duration = total_duration, success, "completed performance tracking");
        Ok(total_duration)
    }

    async fn fetch_duration_samples(&self, key: &str) -> Result<Vec<f64>, AppError> {
        let key_owned = key.to_string();
        let raw: Vec<(String, f64)> = self
            .redis
            .execute(move |mut conn| {
                let key = key_owned.clone();
                async move { redis::cmd("ZRANGE").arg(&key).arg(0).arg(-1).arg("WITHSCORES").query_async(&mut conn).await }
            })
            .await?;
        Ok(raw.into_iter().map(|(_, score)| score).collect())
    }

    pub async fn get_metrics(&self, challenge_types: &[String]) -> Result<PerformanceMetrics, AppError> {
        let counters: HashMap<String, i64> = self
            .redis
            .execute(|mut conn| async move { redis::cmd("HGETALL").arg(METRICS_KEY).query_async(&mut conn).await })
            .await?;

        let total_tracked = counters.get("total_tracked").copied().unwrap_or(0).max(0) as u64;
        let success_count = counters.get("success_count").copied().unwrap_or(0).max(0) as u64;
        let failure_count = counters.get("failure_count").copied().unwrap_or(0).max(0) as u64;
        let success_rate = if total_tracked > 0 { success_count as f64 / total_tracked as f64 } else { 0.0 };

        let total_samples = self.fetch_duration_samples("perf_monitor:durations:total").await?;

        let mut by_challenge_type = HashMap::new();
        for challenge_type in challenge_types {
            let samples = self.fetch_duration_samples(&type_durations_key(challenge_type)).await?;
            by_challenge_type.insert(challenge_type.clone(), duration_stats(samples));
        }

        let mut by_phase = HashMap::new();
        for phase in [
            Phase::Validation,
            Phase::Preparation,
            Phase::QueueWait,
            Phase::K8sResourcesCreation,
            Phase::WaitForRunning,
            Phase::Configuration,
            Phase::NetworkSetup,
        ] {
            let samples = self.fetch_duration_samples(&phase_durations_key(phase)).await?;
            by_phase.insert(phase.as_str().to_string(), duration_stats(samples));
        }

        Ok(PerformanceMetrics {
            total_tracked,
            success_count,
            failure_count,
            success_rate,
            duration_stats: duration_stats(total_samples),
            by_challenge_type,
            by_phase,
        })
    }

    pub async fn get_recent_deployments(&self, limit: isize) -> Result<Vec<DeploymentTracker>, AppError> {
        let task_ids: Vec<String> = self
            .redis
            .execute(move |mut conn| async move {
                redis::cmd("ZREVRANGE").arg(RECENT_KEY).arg(0).arg(limit - 1).query_async(&mut conn).await
            })
            .await?;

        if task_ids.is_empty() {
            return Ok(Vec::new());
        }

        let blobs: Vec<Option<String>> = self
            .redis
            .execute(move |mut conn| {
                let task_ids = task_ids.clone();
                async move { redis::cmd("HMGET").arg(TRACKERS_KEY).arg(&task_ids).query_async(&mut conn).await }
            })
            .await?;

        Ok(blobs.into_iter().flatten().filter_map(|blob| serde_json::from_str(&blob).ok()).collect())
    }

    /// Drops tracker records and recent-deployment entries older than
    /// `older_than_days`. The rolling duration sorted sets already self-trim
    /// by rank so they need no separate sweep.
    pub async fn clear_old_data(&self, older_than_days: i64) -> Result<u64, AppError> {
        let cutoff = chrono::Utc::now().timestamp() - older_than_days * 86_400;

        let stale_ids: Vec<String> = self
            .redis
            .execute(move |mut conn| async move {
                redis::cmd("ZRANGEBYSCORE").arg(RECENT_KEY).arg("-inf").arg(cutoff).query_async(&mut conn).await
            })
            .await?;

        if stale_ids.is_empty() {
            return Ok(0);
        }

        let removed = stale_ids.len() as u64;
        let ids_for_hdel = stale_ids.clone();
        self.redis
            .execute(move |mut conn| {
                let stale_ids = stale_ids.clone();
                let ids_for_hdel = ids_for_hdel.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    pipe.cmd("ZREM").arg(RECENT_KEY).arg(&stale_ids);
                    pipe.cmd("HDEL").arg(TRACKERS_KEY).arg(&ids_for_hdel);
                    pipe.query_async::<()>(&mut conn).await
                }
            })
            .await?;

        Ok(removed)
    }
}
