//! Splitting compound commands into ordered steps.

use crate::types::Step;

/// Connectives in priority order. The first one present in the command is the
/// only one used to split it.
pub const CONNECTIVES: [&str; 12] = [
    " y luego ",
    " y después ",
    " después ",
    " luego ",
    " y pulsa ",
    " y haz clic ",
    " y presiona ",
    " y escribe ",
    " y selecciona ",
    " y espera ",
    ", ",
    " y ",
];

/// Split `command` on the first matching connective, trimming fragments and
/// dropping empty ones. Other connectives stay inside the resulting steps.
pub fn segment(command: &str) -> Vec<Step> {
    match CONNECTIVES.iter().find(|sep| command.contains(**sep)) {
        Some(sep) => command.split(sep).filter_map(Step::new).collect(),
        None => Step::new(command).into_iter().collect(),
    }
}
