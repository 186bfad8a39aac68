use console::style;

pub struct Console;

impl Console {
    const fn get_width() -> usize {
        40
    }

    fn horizontal_border() -> String {
        "═".repeat(Self::get_width())
    }

    pub fn title(text: &str) {
        println!();
        let width = Self::get_width();
        let formatted_text = format!("{:^width$}", text, width = width);
        let border = Self::horizontal_border();

        println!("{}", style(format!("╔{}╗", border)).magenta().bold());
        println!("{}", style(formatted_text).magenta().bold());
        println!("{}", style(format!("╚{}╝", border)).magenta().bold());
    }

    pub fn section(title: &str) {
        println!();
        println!("{}", style(title).magenta().bold());
        println!("{}", style(Self::horizontal_border()).magenta());
    }

    pub fn info(label: &str, value: &str) {
        println!("{}: {}", style(label).dim().magenta(), style(value).white());
    }

    pub fn success(text: &str) {
        println!("{} {}", style("✓").green().bold(), style(text).green());
    }

    pub fn warning(text: &str) {
        println!("{} {}", style("⚠").yellow().bold(), style(text).yellow());
    }

    pub fn error(text: &str) {
        eprintln!("{} {}", style("✗").red().bold(), style(text).red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_helpers_do_not_panic() {
        // These only print, so the test exercises the formatting paths.
        Console::title("Agent");
        Console::section("Startup");
        Console::info("Status", "ok");
        Console::success("done");
        Console::warning("slow");
        Console::error("failed");
    }
}
