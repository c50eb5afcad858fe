use std::sync::Arc;

use super::common::*;
use crate::registration::blocks::CapacityOracle;
use crate::registration::domain::{BlockDraft, BlockPatch};
use crate::registration::store::StoreError;

#[test]
fn counts_only_the_exact_block() {
    let fixture = fixture();
    let coordinator = fixture.coordinator();
    coordinator
        .submit_first_form(
            fixture.event.id,
            fixture.signup.id,
            "ada@example.org",
            signup_submission("Ada", &fixture.rust_lab),
        )
        .expect("registered");

    let oracle = CapacityOracle::new(Arc::clone(&fixture.store));

    assert_eq!(oracle.occupancy_count(fixture.rust_lab.id).expect("count"), 1);
    assert_eq!(oracle.occupancy_count(fixture.morning.id).expect("count"), 0);
    assert!(!oracle.can_admit(fixture.rust_lab.id).expect("answer"));
    assert!(oracle.can_admit(fixture.morning.id).expect("answer"));
}

#[test]
fn holder_may_keep_their_own_seat() {
    let fixture = fixture();
    let participant = fixture
        .coordinator()
        .submit_first_form(
            fixture.event.id,
            fixture.signup.id,
            "ada@example.org",
            signup_submission("Ada", &fixture.rust_lab),
        )
        .expect("registered");

    let oracle = CapacityOracle::new(Arc::clone(&fixture.store));

    assert!(oracle
        .can_admit_for(fixture.rust_lab.id, Some(participant.id))
        .expect("answer"));
}

#[test]
fn admission_reports_remaining_seats() {
    let fixture = fixture();
    fixture
        .coordinator()
        .submit_first_form(
            fixture.event.id,
            fixture.signup.id,
            "ada@example.org",
            signup_submission("Ada", &fixture.morning),
        )
        .expect("registered");

    let oracle = CapacityOracle::new(Arc::clone(&fixture.store));
    let admission = oracle
        .admission(fixture.workshop.id, fixture.morning.id)
        .expect("admission");

    assert_eq!(admission.occupied, 1);
    assert_eq!(admission.capacity, Some(2));
    assert_eq!(admission.remaining, Some(1));
    assert!(admission.admissible);

    let unlimited = oracle
        .admission(fixture.workshop.id, fixture.afternoon.id)
        .expect("admission");
    assert_eq!(unlimited.capacity, None);
    assert_eq!(unlimited.remaining, None);
    assert!(unlimited.admissible);
}

#[test]
fn zero_capacity_blocks_admit_everyone() {
    let fixture = fixture();
    let catalog = fixture.catalog();
    let hall = catalog
        .add_block(
            fixture.workshop.id,
            None,
            BlockDraft::new(fixture.workshop.id, "Hall").capacity(0),
        )
        .expect("hall");
    let oracle = CapacityOracle::new(Arc::clone(&fixture.store));
    assert!(oracle.can_admit(hall.id).expect("answer"));

    catalog
        .update_block(
            hall.id,
            BlockPatch {
                capacity: Some(1),
                ..BlockPatch::default()
            },
        )
        .expect("capacity raised");
    let admission = oracle.admission(fixture.workshop.id, hall.id).expect("admission");
    assert_eq!(admission.remaining, Some(1));
}

#[test]
fn admission_is_scoped_to_the_attribute() {
    let fixture = fixture();
    let oracle = CapacityOracle::new(Arc::clone(&fixture.store));

    let err = oracle
        .admission(fixture.first_name.id, fixture.morning.id)
        .expect_err("block belongs to the workshop attribute");

    assert!(matches!(err, StoreError::NotFound { entity: "block", .. }));
}
