//! Terminal nodes. They have no invoke function; their state is the value
//! held on `input`, read through the store or `Input` events.

use conductor_core::shape::{Shape, ValueKind};
use conductor_core::types::DEFAULT_INPUT;

use crate::descriptor::NodeDescriptor;

/// Boolean indicator.
pub fn beacon() -> NodeDescriptor {
    NodeDescriptor::new("beacon")
        .with_description("Boolean indicator")
        .with_input(Shape::empty().with(DEFAULT_INPUT, ValueKind::Boolean))
}

/// Displays any value.
pub fn text() -> NodeDescriptor {
    NodeDescriptor::new("text")
        .with_description("Displays `input`")
        .with_input(Shape::empty().with(DEFAULT_INPUT, ValueKind::Any))
}

/// Text scope; shows the string on `input`.
pub fn scope() -> NodeDescriptor {
    NodeDescriptor::new("scope")
        .with_description("Shows the text on `input`")
        .with_input(Shape::empty().with(DEFAULT_INPUT, ValueKind::String))
}
