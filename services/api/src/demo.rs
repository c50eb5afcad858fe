use crate::infra::{LocalFileStorage, LoggingNotifier};
use clap::Args;
use regdesk::error::AppError;
use regdesk::registration::blocks::{BlockNode, DEFAULT_MAX_DEPTH};
use regdesk::registration::domain::{
    AttributeDraft, AttributeType, BlockDraft, FormDraft, FormField, NotificationTrigger,
    RawValue, Submission, TriggerCondition,
};
use regdesk::registration::{EnrollmentError, MemoryRegistry, RegistrationDesk};
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Seats in the workshop room; the demo registers one attendee too many.
    #[arg(long, default_value_t = 2)]
    pub(crate) capacity: u32,
    /// Attendees registered into the main hall.
    #[arg(long, default_value_t = 3)]
    pub(crate) hall_attendees: usize,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let notifier = Arc::new(LoggingNotifier::default());
    let upload_dir = std::env::temp_dir().join("regdesk-demo");
    let files = Arc::new(LocalFileStorage::open(&upload_dir, 1024 * 1024)?);
    let desk = RegistrationDesk::new(
        Arc::new(MemoryRegistry::new()),
        files,
        Arc::clone(&notifier),
        DEFAULT_MAX_DEPTH,
    );
    let catalog = &desk.catalog;

    let event = catalog.create_event("Rust Meetup")?;
    let first_name = catalog.declare_attribute(
        event.id,
        AttributeDraft::new("First name", "first_name", AttributeType::Text),
    )?;
    let last_name = catalog.declare_attribute(
        event.id,
        AttributeDraft::new("Last name", "last_name", AttributeType::Text),
    )?;
    let session = catalog.declare_attribute(
        event.id,
        AttributeDraft::new("Session", "session", AttributeType::Block),
    )?;

    let hall = catalog.add_block(
        session.id,
        None,
        BlockDraft::new(session.id, "Main hall").description("Talks all day"),
    )?;
    let workshop = catalog.add_block(
        session.id,
        Some(hall.id),
        BlockDraft::new(session.id, "Workshop room").capacity(args.capacity),
    )?;
    catalog.add_block(session.id, None, BlockDraft::new(session.id, "Lounge"))?;

    let signup = catalog.create_form(
        event.id,
        FormDraft {
            name: "Register".to_string(),
            is_first: true,
            fields: vec![
                FormField::required(first_name.id),
                FormField::optional(last_name.id),
                FormField::required(session.id),
            ],
        },
    )?;
    catalog.set_label_attributes(event.id, vec![first_name.id, last_name.id])?;
    catalog.add_trigger(
        event.id,
        NotificationTrigger {
            template: "session-confirmed".to_string(),
            condition: TriggerCondition::BlockAdmitted {
                attribute_id: session.id,
                block_id: None,
            },
        },
    )?;

    println!("Registration desk demo");
    println!("Event: {} (#{})", event.name, event.id);

    let workshop_attendees = args.capacity as usize + 1;
    let attendees = (0..args.hall_attendees)
        .map(|index| (index, &hall))
        .chain((0..workshop_attendees).map(|index| (args.hall_attendees + index, &workshop)));

    println!("\nSubmissions:");
    for (index, block) in attendees {
        let email = format!("attendee{index}@example.org");
        let submission = Submission::new()
            .with("first_name", RawValue::text(format!("Attendee{index}")))
            .with("last_name", RawValue::text("Rustacean"))
            .with("session", RawValue::text(block.id.as_value()));

        match desk
            .coordinator
            .submit_first_form(event.id, signup.id, &email, submission)
        {
            Ok(participant) => println!(
                "  {email:<28} -> {} (token {})",
                block.name, participant.token
            ),
            Err(err) => println!("  {email:<28} -> rejected: {err}"),
        }
    }

    let admission = desk
        .oracle
        .admission(session.id, workshop.id)
        .map_err(EnrollmentError::from)?;
    println!(
        "\nWorkshop room: {} occupied, {} remaining",
        admission.occupied,
        admission.remaining.unwrap_or(0)
    );

    let tree = desk
        .trees
        .load_tree(session.id)
        .map_err(EnrollmentError::from)?;
    println!("\nSession tree:");
    render_node(&tree.root, 1);

    println!("\nNotifications sent: {}", notifier.history().len());
    Ok(())
}

fn render_node(node: &BlockNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let capacity = match node.block.limit() {
        Some(limit) => format!("{}/{limit}", node.occupant_count),
        None => format!("{}", node.occupant_count),
    };
    println!("{indent}{} [{capacity}]", node.block.name);
    for occupant in &node.occupants {
        println!("{indent}  - {}", occupant.label);
    }
    for child in &node.children {
        render_node(child, depth + 1);
    }
}
