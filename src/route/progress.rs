use crate::geo::{distance_between_km, Coord};

use super::model::Direction;

/// Where the user is along the active route.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RouteProgress {
    pub direction_index: usize,
    pub distance_to_next_turn_m: f64,
}

/// Index of the leg the snapped edge belongs to. The scan keeps the *last*
/// matching direction; with no match at all the index defaults to 1 —
/// "already on the first leg" rather than "still at the very start" (index 0
/// is the not-yet-departed leg).
pub fn direction_index(snapped_edge_id: i64, directions: &[Direction]) -> usize {
    let mut index = 1;
    for (i, direction) in directions.iter().enumerate() {
        if direction.contains_edge(snapped_edge_id) {
            index = i;
        }
    }
    index
}

/// Meters from the matched position to a turn point.
pub fn distance_to_next_turn_m(matched: &Coord, turn_point: &Coord) -> f64 {
    distance_between_km(matched, turn_point) * 1000.0
}

/// Progress along the active route. Precondition: `directions` is non-empty;
/// the orchestrator only calls this with an active route that has legs.
pub fn progress(snapped_edge_id: i64, matched: &Coord, directions: &[Direction]) -> RouteProgress {
    let index = direction_index(snapped_edge_id, directions);
    let turn = &directions[index.min(directions.len() - 1)];
    RouteProgress {
        direction_index: index,
        distance_to_next_turn_m: distance_to_next_turn_m(matched, &turn.turn_point),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::distance_km;
    use approx::assert_relative_eq;

    fn direction(edge_ids: Vec<i64>, turn: (f64, f64)) -> Direction {
        Direction {
            edge_ids,
            turn_point: Coord::new(turn.0, turn.1),
            ..Direction::default()
        }
    }

    #[test]
    fn defaults_to_one_when_nothing_matches() {
        let directions = vec![
            direction(vec![1, 2], (0.0, 0.0)),
            direction(vec![3, 4], (0.0, 0.0)),
            direction(vec![5, 6], (0.0, 0.0)),
        ];
        assert_eq!(direction_index(99, &directions), 1);
    }

    #[test]
    fn last_match_wins() {
        let directions = vec![
            direction(vec![7], (0.0, 0.0)),
            direction(vec![3], (0.0, 0.0)),
            direction(vec![7], (0.0, 0.0)),
        ];
        assert_eq!(direction_index(7, &directions), 2);
    }

    #[test]
    fn match_on_first_leg_returns_zero() {
        let directions = vec![
            direction(vec![7], (0.0, 0.0)),
            direction(vec![3], (0.0, 0.0)),
        ];
        assert_eq!(direction_index(7, &directions), 0);
    }

    #[test]
    fn turn_distance_is_haversine_in_meters() {
        let matched = Coord::new(-6.1754, 106.8272);
        let turn = Coord::new(-6.1376, 106.8171);
        let expected = distance_km(matched.lat, matched.lon, turn.lat, turn.lon) * 1000.0;
        assert_relative_eq!(
            distance_to_next_turn_m(&matched, &turn),
            expected,
            max_relative = 1e-12
        );
    }

    #[test]
    fn progress_combines_index_and_distance() {
        let directions = vec![
            direction(vec![1], (-6.1754, 106.8272)),
            direction(vec![42], (-6.1376, 106.8171)),
        ];
        let matched = Coord::new(-6.1754, 106.8272);

        let p = progress(42, &matched, &directions);
        assert_eq!(p.direction_index, 1);
        assert!(p.distance_to_next_turn_m > 0.0);
    }

    #[test]
    fn single_leg_default_does_not_panic() {
        let directions = vec![direction(vec![1], (-6.1754, 106.8272))];
        let matched = Coord::new(-6.1754, 106.8272);

        // No match: the index still defaults to 1, the turn lookup clamps.
        let p = progress(99, &matched, &directions);
        assert_eq!(p.direction_index, 1);
        assert_eq!(p.distance_to_next_turn_m, 0.0);
    }
}
