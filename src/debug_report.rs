//! ANSI pretty-printer for a [`RollResult`] (spec §4.8 trace, §6).
//!
//! Mirrors `astorion::debug_report`'s layout: a small [`ansi::Palette`]
//! gates color codes behind a bool, and each report section (result,
//! warnings, captures, descriptions, trace) is its own `print_*`
//! function, called in sequence by [`print_run`].

use tableforge::{RollResult, TraceOutput, WarningFlags};

mod ansi {
    const RESET: &str = "\x1b[0m";
    const BOLD: &str = "\x1b[1m";
    const DIM: &str = "\x1b[2m";

    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Palette { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, color: &str) -> String {
            if self.enabled { format!("{color}{}{RESET}", s.as_ref()) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{BOLD}{}{RESET}", s.as_ref()) } else { s.as_ref().to_string() }
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{DIM}{}{RESET}", s.as_ref()) } else { s.as_ref().to_string() }
        }
    }
}

/// Render a roll/template/raw-pattern result to stdout.
pub fn print_run(result: &RollResult, color: bool) {
    let p = ansi::Palette::new(color);

    println!("\n{}", p.bold(p.paint(format!("== {} ==", result.metadata.source_id), ansi::CYAN)));
    print_result(result, &p);

    if !result.warnings.is_empty() {
        println!("\n{}", p.paint("-- warnings --", ansi::GRAY));
        print_warnings(result.warnings, &p);
    }

    if !result.placeholders.is_empty() {
        println!("\n{}", p.paint("-- placeholders --", ansi::GRAY));
        print_placeholders(result, &p);
    }

    if !result.captures.is_empty() {
        println!("\n{}", p.paint("-- captures --", ansi::GRAY));
        print_captures(result, &p);
    }

    if !result.descriptions.is_empty() {
        println!("\n{}", p.paint("-- descriptions --", ansi::GRAY));
        print_descriptions(result, &p);
    }

    if !result.expression_outputs.is_empty() {
        println!("\n{}", p.paint("-- expressions --", ansi::GRAY));
        print_expressions(result, &p);
    }

    if let Some(trace) = &result.trace {
        println!("\n{}", p.paint("-- trace --", ansi::GRAY));
        print_trace(trace, 0, &p);
    }

    println!(
        "\n{} {}  {} {}",
        p.dim("collection:"),
        p.dim(&result.metadata.collection_id),
        p.dim("entry:"),
        p.dim(result.metadata.entry_id.as_deref().unwrap_or("-")),
    );
}

fn print_result(result: &RollResult, p: &ansi::Palette) {
    println!("  {}", p.bold(p.paint(&result.text, ansi::GREEN)));
    if let Some(rt) = &result.result_type {
        println!("  {} {}", p.dim("type:"), p.paint(rt, ansi::BLUE));
    }
    if let Some(assets) = &result.assets {
        if !assets.is_empty() {
            println!("  {} {}", p.dim("assets:"), p.paint(assets.join(", "), ansi::BLUE));
        }
    }
}

fn print_warnings(flags: WarningFlags, p: &ansi::Palette) {
    for (name, _) in flags.iter_names() {
        println!("  {} {}", p.paint("!", ansi::YELLOW), p.dim(name));
    }
}

fn print_placeholders(result: &RollResult, p: &ansi::Palette) {
    for (group, values) in &result.placeholders {
        println!("  {}", p.paint(group, ansi::BLUE));
        for (key, value) in values {
            println!("    {} {} {}", p.dim(key), p.dim("="), value);
        }
    }
}

fn print_captures(result: &RollResult, p: &ansi::Palette) {
    for (name, items) in &result.captures {
        println!("  {} {}", p.paint(format!("${name}"), ansi::BLUE), p.dim(format!("({} item(s))", items.len())));
        for (i, item) in items.iter().enumerate() {
            println!("    {} {}", p.dim(format!("[{i}]")), item.value);
            for (key, value) in &item.sets {
                println!("        {} {} {}", p.dim(key), p.dim("="), value);
            }
        }
    }
}

fn print_descriptions(result: &RollResult, p: &ansi::Palette) {
    for d in &result.descriptions {
        println!(
            "  {} {} {} {}",
            p.dim(format!("depth {}", d.depth)),
            p.bold(&d.rolled_value),
            p.dim("-"),
            d.description,
        );
    }
}

fn print_expressions(result: &RollResult, p: &ansi::Palette) {
    for expr in &result.expression_outputs {
        println!("  {} {} {}", p.dim(&expr.raw), p.dim("->"), p.paint(&expr.output, ansi::GREEN));
    }
}

fn print_trace(node: &TraceOutput, depth: usize, p: &ansi::Palette) {
    let indent = "  ".repeat(depth + 1);
    match &node.output {
        Some(output) => println!("{indent}{} {} {}", p.paint(&node.label, ansi::CYAN), p.dim("->"), output),
        None => println!("{indent}{}", p.paint(&node.label, ansi::CYAN)),
    }
    for child in &node.children {
        print_trace(child, depth + 1, p);
    }
}
