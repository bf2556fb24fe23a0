//! End-to-end chaos scenarios.
//!
//! | Module | Requirements |
//! |--------|--------------|
//! | convergence | none (scripted probes, paused clock) |
//! | iteration | none (stub lifecycle control, in-memory edge API) |
//! | live | a running cluster, `FABRIC_CHAOS_CONFIG` pointing at its config |

mod convergence;
mod iteration;
mod live;
