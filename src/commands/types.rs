use anyhow::Result;
use colored::Colorize;
use reconcile::{ResourceSchema, TypeRegistry};

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let registry = TypeRegistry::standard();

    ui::header("Resource Types");
    for schema in registry.iter() {
        println!();
        match &schema.parent_type {
            Some(parent) => println!(
                "  {} {}",
                schema.type_name.bold(),
                format!("(under {parent})").dimmed()
            ),
            None => println!("  {}", schema.type_name.bold()),
        }
        if !ctx.quiet {
            for line in field_lines(schema) {
                ui::dim(&line);
            }
        }
    }
    Ok(())
}

/// One line per field: name plus its flags
fn field_lines(schema: &ResourceSchema) -> Vec<String> {
    schema
        .fields
        .iter()
        .map(|f| {
            let mut flags = vec![if f.is_immutable() { "immutable" } else { "mutable" }];
            if !f.required {
                flags.push("optional");
            }
            if f.secret {
                flags.push("secret");
            }
            format!("  {} ({})", f.name, flags.join(", "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_lines() {
        let registry = TypeRegistry::standard();
        let lines = field_lines(registry.get("Channel").unwrap());
        assert!(lines.contains(&"  kind (immutable)".to_string()));
        assert!(lines.contains(&"  auth_header (mutable, optional, secret)".to_string()));
    }
}
