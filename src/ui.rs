use colored::Colorize;
use reconcile::{ChangePlan, Operation, OperationKind};

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Symbol used for an operation kind
pub fn kind_symbol(kind: OperationKind) -> colored::ColoredString {
    match kind {
        OperationKind::Create => "+".green().bold(),
        OperationKind::Update => "~".yellow().bold(),
        OperationKind::Delete => "-".red().bold(),
    }
}

/// Print a change plan, one operation per line
pub fn print_plan(plan: &ChangePlan, show_secrets: bool, show_deps: bool) {
    for (index, planned) in plan.iter().enumerate() {
        let operation = &planned.operation;
        println!("  {} {}", kind_symbol(operation.kind()), operation);
        if let Operation::Update { changes, .. } = operation {
            for change in changes {
                dim(&format!("    {}", change.render(show_secrets)));
            }
        }
        if show_deps && !planned.depends_on.is_empty() {
            let deps: Vec<String> = planned.depends_on.iter().map(|d| format!("#{d}")).collect();
            dim(&format!("    #{index} waits for {}", deps.join(", ")));
        }
    }
    println!();
    kv("Plan", &plan.summary().to_string());
}
