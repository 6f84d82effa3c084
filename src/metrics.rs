//! Prometheus metrics for toolpilot
//!
//! All collectors register with the default registry on first use.
//! [`render`] returns the text exposition format, which the REPL prints
//! for `/metrics`.
//!
//! ```text
//! toolpilot_turns_total{outcome}              response | loop_detected | max_iterations | error | rejected
//! toolpilot_iterations_per_turn               model calls per completed turn
//! toolpilot_tool_calls_total{tool,status}     status = ok | ERROR_* code
//! toolpilot_llm_call_duration_seconds{model}  wall time of one model call
//! ```

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, Encoder, Histogram,
    HistogramVec, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Turns handled, by how they ended
    pub static ref AGENT_TURNS: IntCounterVec = register_int_counter_vec!(
        "toolpilot_turns_total",
        "Conversation turns handled, by outcome",
        &["outcome"]
    )
    .expect("register toolpilot_turns_total");

    /// Model calls made per turn
    pub static ref AGENT_ITERATIONS_TOTAL: Histogram = register_histogram!(
        "toolpilot_iterations_per_turn",
        "Model calls made in a single turn",
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 7.0, 10.0, 15.0, 20.0]
    )
    .expect("register toolpilot_iterations_per_turn");

    /// Tool executions, by canonical tool name and result
    pub static ref AGENT_TOOL_CALLS: IntCounterVec = register_int_counter_vec!(
        "toolpilot_tool_calls_total",
        "Tool calls executed, by tool and status",
        &["tool", "status"]
    )
    .expect("register toolpilot_tool_calls_total");

    /// Latency of a single model call
    pub static ref LLM_CALL_TIME: HistogramVec = register_histogram_vec!(
        "toolpilot_llm_call_duration_seconds",
        "Wall time of one chat completion",
        &["model"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("register toolpilot_llm_call_duration_seconds");
}

/// Encode everything in the default registry as Prometheus text
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        return format!("# failed to encode metrics: {}\n", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
