/// Command list entries exposed by a command runner to the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Action {
        name: String,
    },
    Complex {
        name: String,
        args: Vec<CommandArg>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandArg {
    Number {
        name: String,
        value: f64,
        min: f64,
        max: f64,
        step: f64,
    },
    Color {
        name: String,
        /// Hex text form, `#rrggbb`.
        value: String,
    },
}

/// A user action dispatched back into a command runner.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub command_name: String,
    pub args: Vec<ActionArg>,
}

impl Action {
    pub fn named(command_name: &str) -> Self {
        Action {
            command_name: command_name.to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionArg {
    Number { name: String, value: f64 },
    Color { name: String, value: String },
}
