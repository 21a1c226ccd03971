use crate::config::NamedOption;
use std::fmt;

/// Fully composed driver invocation arguments
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    args: Vec<String>,
}

impl CommandLine {
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

/// Composes base arguments with `--<name>=<value>` flags for named options
///
/// Base arguments come first, named options follow in the order they were given.
/// Options without a value contribute nothing.
#[derive(Debug, Clone, Default)]
pub struct CommandLineBuilder {
    base: Vec<String>,
    named: Vec<String>,
}

impl CommandLineBuilder {
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(base: I) -> Self {
        Self {
            base: base.into_iter().map(|s| s.to_string()).collect(),
            named: Vec::new(),
        }
    }

    pub fn named_option(mut self, name: &str, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.named.push(format!("--{name}={value}"));
        }
        self
    }

    pub fn named_options<'a, I: IntoIterator<Item = &'a NamedOption>>(self, options: I) -> Self {
        options.into_iter().fold(self, |builder, option| {
            builder.named_option(&option.name, option.value.as_deref())
        })
    }

    pub fn build(self) -> CommandLine {
        let mut args = self.base;
        args.extend(self.named);
        CommandLine { args }
    }
}
