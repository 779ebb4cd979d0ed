//! Prometheus text exposition format.
//!
//! Renders pool metrics snapshots into the Prometheus text exposition
//! format for scraping by a Prometheus server or compatible agent.

use fedgate_state::PoolMetricsRecord;

/// Render a list of pool snapshots into Prometheus text format.
///
/// Produces GAUGE and COUNTER metrics with `server` labels.
pub fn render_prometheus(snapshots: &[PoolMetricsRecord]) -> String {
    let mut out = String::new();

    out.push_str("# HELP fedgate_pool_health_score Rolling health check pass fraction (0.0-1.0).\n");
    out.push_str("# TYPE fedgate_pool_health_score gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "fedgate_pool_health_score{{server=\"{}\"}} {:.4}\n",
            s.server_id, s.health_score
        ));
    }

    out.push_str("# HELP fedgate_pool_sessions Session count by state.\n");
    out.push_str("# TYPE fedgate_pool_sessions gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "fedgate_pool_sessions{{server=\"{}\",state=\"idle\"}} {}\n",
            s.server_id, s.sessions_idle
        ));
        out.push_str(&format!(
            "fedgate_pool_sessions{{server=\"{}\",state=\"active\"}} {}\n",
            s.server_id, s.sessions_active
        ));
    }

    out.push_str("# HELP fedgate_pool_wait_p50_ms P50 acquire wait time in milliseconds.\n");
    out.push_str("# TYPE fedgate_pool_wait_p50_ms gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "fedgate_pool_wait_p50_ms{{server=\"{}\"}} {:.2}\n",
            s.server_id, s.wait_p50_ms
        ));
    }

    out.push_str("# HELP fedgate_pool_wait_p99_ms P99 acquire wait time in milliseconds.\n");
    out.push_str("# TYPE fedgate_pool_wait_p99_ms gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "fedgate_pool_wait_p99_ms{{server=\"{}\"}} {:.2}\n",
            s.server_id, s.wait_p99_ms
        ));
    }

    out.push_str("# HELP fedgate_pool_timeouts_total Acquire timeouts since pool creation.\n");
    out.push_str("# TYPE fedgate_pool_timeouts_total counter\n");
    for s in snapshots {
        out.push_str(&format!(
            "fedgate_pool_timeouts_total{{server=\"{}\"}} {}\n",
            s.server_id, s.timeouts_total
        ));
    }

    out.push_str("# HELP fedgate_pool_creates_total Sessions created since pool creation.\n");
    out.push_str("# TYPE fedgate_pool_creates_total counter\n");
    for s in snapshots {
        out.push_str(&format!(
            "fedgate_pool_creates_total{{server=\"{}\"}} {}\n",
            s.server_id, s.creates_total
        ));
    }

    out.push_str("# HELP fedgate_pool_releases_total Sessions released since pool creation.\n");
    out.push_str("# TYPE fedgate_pool_releases_total counter\n");
    for s in snapshots {
        out.push_str(&format!(
            "fedgate_pool_releases_total{{server=\"{}\"}} {}\n",
            s.server_id, s.releases_total
        ));
    }

    out.push_str("# HELP fedgate_pool_reuse_rate Releases per session created.\n");
    out.push_str("# TYPE fedgate_pool_reuse_rate gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "fedgate_pool_reuse_rate{{server=\"{}\"}} {:.2}\n",
            s.server_id, s.reuse_rate
        ));
    }

    out
}
