use crate::types::ActionType;

/// Keyword groups checked in priority order; first hit wins.
const RULES: [(ActionType, &[&str]); 5] = [
    (ActionType::Navigate, &["navega", "abre", "ve a", "ir a"]),
    (ActionType::Wait, &["espera", "segundos"]),
    (ActionType::Type, &["escribe", "ingresa", "llena", "completa"]),
    (
        ActionType::Click,
        &["clic", "pulsa", "presiona", "hace click", "selecciona"],
    ),
    (ActionType::Extract, &["obtén", "extrae", "lee", "captura"]),
];

/// Label a step by case-insensitive keyword matching.
pub fn classify(step: &str) -> ActionType {
    let lower = step.to_lowercase();
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(action, _)| *action)
        .unwrap_or(ActionType::General)
}
