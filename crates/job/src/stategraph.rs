// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job protocol's state graph.
//!
//! States beyond the built-in `start`, `stop`, `failed`: `configure`,
//! `process`, `close`, `merge`.
//!
//! ```text
//! start ─[config]→ configure ─[process]→ process ─[close]→ close ─[merge]→ merge
//! process ─[process]→ process          merge ─[merge]→ merge
//! merge ─[process]→ process            close ─[process]→ process
//! start/configure/close/merge ─[stop]→ stop
//! ```
//!
//! Restriction sets:
//! - `noprocess`: every `process`-labelled transition; active while no
//!   event ranges are left to hand out.
//! - `nomerge`: every `merge`-labelled transition; active while fewer
//!   than two unmerged outputs remain.

use fw_swarm::{StateGraph, SwarmError};

use crate::messages::kind;

pub const RS_NOPROCESS: &str = "noprocess";
pub const RS_NOMERGE: &str = "nomerge";

pub fn job_graph() -> Result<StateGraph, SwarmError> {
    let mut g = StateGraph::new();
    let start = g.state("start")?;
    let stop = g.state("stop")?;
    let configure = g.add_state("configure")?;
    let process = g.add_state("process")?;
    let close = g.add_state("close")?;
    let merge = g.add_state("merge")?;

    g.add_transition(kind::CONFIGURE, start, configure)?;

    g.add_transition(kind::PROCESS, configure, process)?;
    g.add_transition(kind::PROCESS, process, process)?;
    g.add_transition(kind::PROCESS, merge, process)?;
    g.add_transition(kind::PROCESS, close, process)?;
    g.add_transition(kind::CLOSE, process, close)?;
    g.add_transition(kind::MERGE, close, merge)?;
    g.add_transition(kind::MERGE, merge, merge)?;

    g.add_transition(kind::STOP, close, stop)?;
    g.add_transition(kind::STOP, merge, stop)?;
    g.add_transition(kind::STOP, start, stop)?;
    g.add_transition(kind::STOP, configure, stop)?;

    let noprocess = g.add_restriction_set(RS_NOPROCESS)?;
    g.add_restriction(noprocess, configure, process)?;
    g.add_restriction(noprocess, process, process)?;
    g.add_restriction(noprocess, merge, process)?;
    g.add_restriction(noprocess, close, process)?;

    let nomerge = g.add_restriction_set(RS_NOMERGE)?;
    g.add_restriction(nomerge, close, merge)?;
    g.add_restriction(nomerge, merge, merge)?;

    Ok(g)
}
