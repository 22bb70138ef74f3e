//! Test: waypoint sequences from grammar, coordinates and CSV

use crate::helpers::*;
use stagescan::core::{Axis, Sequence, SequenceError, Waypoint};
use std::io::Write;

fn xy(x: f64, y: f64) -> Waypoint {
    Waypoint::new().with(Axis::X, x).with(Axis::Y, y)
}

/// The first clause is the outer loop
#[test]
fn test_grammar_traversal_order() {
    let sequence = Sequence::generate("x(0,1,1) y(0,2,1)", &XYZ).unwrap();

    let expected = vec![xy(0.0, 0.0), xy(0.0, 1.0), xy(0.0, 2.0), xy(1.0, 0.0), xy(1.0, 1.0), xy(1.0, 2.0)];
    assert_eq!(sequence.iter().cloned().collect::<Vec<_>>(), expected);
    assert_eq!(sequence.distance(), 6.0);
}

#[test]
fn test_sequence_iterates_more_than_once() {
    let sequence = Sequence::generate("z(0,0.5,0.25)", &XYZ).unwrap();
    let first: Vec<_> = sequence.iter().collect();
    let second: Vec<_> = (&sequence).into_iter().collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
}

#[test]
fn test_grammar_errors() {
    assert!(matches!(Sequence::generate("w(0,1,1)", &XYZ), Err(SequenceError::Axis(_))));
    assert!(matches!(Sequence::generate("x(0,1)", &XYZ), Err(SequenceError::Grammar(_))));
    assert!(matches!(Sequence::generate("x(0,1,1);y(0,1,1)", &XYZ), Err(SequenceError::Grammar(_))));
    assert!(matches!(Sequence::generate("x(0,1,1)x(0,2,1)", &XYZ), Err(SequenceError::Grammar(_))));
}

/// Partial waypoints only carry the axes they name
#[test]
fn test_partial_coordinates() {
    let rows = vec![vec![Some(1.0), None, Some(3.0)], vec![Some(4.0)]];
    let sequence = Sequence::from_coordinates(&rows, &XYZ).unwrap();

    assert_eq!(sequence.get(0).unwrap().axes().collect::<Vec<_>>(), vec![Axis::X, Axis::Z]);
    assert_eq!(sequence.get(1).unwrap().get(Axis::X), Some(4.0));
    assert!(!sequence.get(1).unwrap().contains(Axis::Y));
    assert_eq!(sequence.distance(), 3.0);
}

#[test]
fn test_csv_coordinates() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "0, 0, 1").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "2.5,,1").unwrap();
    file.flush().unwrap();

    let sequence = Sequence::from_csv(file.path(), &XYZ).unwrap();

    assert_eq!(sequence.len(), 2);
    assert_eq!(sequence.get(1).unwrap().get(Axis::X), Some(2.5));
    assert_eq!(sequence.get(1).unwrap().get(Axis::Y), None);
}

#[test]
fn test_csv_bad_cell() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "0,0,0").unwrap();
    writeln!(file, "1,left,0").unwrap();
    file.flush().unwrap();

    match Sequence::from_csv(file.path(), &XYZ) {
        Err(SequenceError::Coordinate { row, value }) => {
            assert_eq!(row, 2);
            assert_eq!(value, "left");
        }
        other => panic!("expected a coordinate error, got {:?}", other),
    }
}
