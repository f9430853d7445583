//! Behavioural scenarios for the container lifecycle.

mod lifecycle;
