mod commands;
mod examples;
mod output;
mod theme;

use anyhow::Result;
use clap::{
    builder::{
        styling::{AnsiColor, Color as ClapColor, RgbColor, Style},
        Styles,
    },
    ColorChoice, Command, CommandFactory, FromArgMatches, Parser, Subcommand,
};
use colored::{control::ShouldColorize, Color as ThemeColor, Colorize};
use std::fmt::Write as FmtWrite;

use commands::{
    analyze::{handle_analyze, AnalyzeArgs},
    drift::{handle_drift_commands, DriftCommands},
    init::{handle_init, InitArgs},
    migrate::{handle_migrate_commands, MigrateCommands},
    schema::{handle_schema_commands, SchemaCommands},
    validate::{handle_validate_commands, ValidateCommands},
};
use examples::{command_examples, ExampleGroup};
use output::{GlobalOptions, OutputFormat, OutputManager};
use theme::{ICONS, THEME};

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("MSCHEMA_MONGODB_URI", "MongoDB connection string"),
    ("MSCHEMA_DEFAULT_DB", "Default database name"),
    ("RUST_LOG", "Log filter (e.g. mschema=debug)"),
];

#[derive(Parser)]
#[command(name = "mschema")]
#[command(version)]
#[command(
    about = "Schema inference, drift detection, and migrations for MongoDB",
    long_about = r#"Schema management for schemaless collections:

• Infer schemas from live data by sampling
• Persist them as versioned YAML files and diff versions
• Detect drift between declared schemas and live collections
• Compile and apply resumable, rate-limited migration plans

Commands:
  init      Write a starter .mschema.yml
  analyze   Infer a collection's schema
  schema    Diff schema files, index advice
  drift     Detect or monitor schema drift
  migrate   Plan and apply migrations
  validate  Test documents or install the engine validator
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Suppress output (only errors are shown)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file for this project
    Init(InitArgs),

    /// Sample a collection and infer its schema
    Analyze(AnalyzeArgs),

    /// Work with schema files
    #[command(subcommand)]
    Schema(SchemaCommands),

    /// Compare declared schemas with live data
    #[command(subcommand)]
    Drift(DriftCommands),

    /// Plan and apply data migrations
    #[command(subcommand)]
    Migrate(MigrateCommands),

    /// Validate documents and manage the engine validator
    #[command(subcommand)]
    Validate(ValidateCommands),
}

fn build_cli_command() -> Command {
    let use_color = ShouldColorize::from_env().should_colorize();
    let mut command = Cli::command()
        .styles(help_styles())
        .color(if use_color {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        })
        .after_long_help(render_env_appendix(use_color));

    for example in command_examples() {
        if let Some(subcommand) = command.find_subcommand_mut(example.name) {
            let help = render_examples(example.groups, use_color);
            *subcommand = subcommand.clone().after_long_help(help);
        }
    }
    command
}

fn render_examples(groups: &[ExampleGroup], use_color: bool) -> String {
    let mut buffer = String::new();
    let _ = writeln!(buffer, "{}", stylize("Examples:", THEME.highlight, true, use_color));
    for (index, group) in groups.iter().enumerate() {
        let _ = writeln!(buffer, "  {}", stylize(group.title, THEME.primary, true, use_color));
        for command in group.commands {
            let _ = writeln!(
                buffer,
                "    {} {}",
                stylize(ICONS.arrow, THEME.muted, false, use_color),
                stylize(command, THEME.value, false, use_color)
            );
        }
        if index + 1 < groups.len() {
            buffer.push('\n');
        }
    }
    buffer
}

fn render_env_appendix(use_color: bool) -> String {
    let mut buffer = String::new();
    let _ = writeln!(
        buffer,
        "{}",
        stylize("Environment Variables:", THEME.highlight, true, use_color)
    );
    for (key, description) in ENVIRONMENT_VARIABLES {
        let _ = writeln!(
            buffer,
            "  {}  {}",
            stylize(key, THEME.key, true, use_color),
            stylize(description, THEME.value, false, use_color)
        );
    }
    buffer.push('\n');
    let _ = writeln!(
        buffer,
        "{} {}",
        stylize("Tip:", THEME.highlight, true, use_color),
        stylize(
            "Use 'mschema <command> --help' to view examples for each command.",
            THEME.muted,
            false,
            use_color,
        )
    );
    buffer
}

fn stylize(text: &str, color: ThemeColor, bold: bool, use_color: bool) -> String {
    if use_color {
        let styled = text.color(color);
        if bold {
            styled.bold().to_string()
        } else {
            styled.to_string()
        }
    } else {
        text.to_string()
    }
}

fn help_styles() -> Styles {
    Styles::styled()
        .usage(style_from_color(THEME.primary).bold())
        .header(style_from_color(THEME.highlight).bold())
        .literal(style_from_color(THEME.key))
        .placeholder(style_from_color(THEME.muted))
        .error(style_from_color(THEME.error).bold())
}

fn style_from_color(color: ThemeColor) -> Style {
    Style::new().fg_color(Some(color_to_clap_color(color)))
}

fn color_to_clap_color(color: ThemeColor) -> ClapColor {
    match color {
        ThemeColor::Black => ClapColor::Ansi(AnsiColor::Black),
        ThemeColor::Red => ClapColor::Ansi(AnsiColor::Red),
        ThemeColor::Green => ClapColor::Ansi(AnsiColor::Green),
        ThemeColor::Yellow => ClapColor::Ansi(AnsiColor::Yellow),
        ThemeColor::Blue => ClapColor::Ansi(AnsiColor::Blue),
        ThemeColor::Magenta => ClapColor::Ansi(AnsiColor::Magenta),
        ThemeColor::Cyan => ClapColor::Ansi(AnsiColor::Cyan),
        ThemeColor::White => ClapColor::Ansi(AnsiColor::White),
        ThemeColor::BrightBlack => ClapColor::Ansi(AnsiColor::BrightBlack),
        ThemeColor::BrightRed => ClapColor::Ansi(AnsiColor::BrightRed),
        ThemeColor::BrightGreen => ClapColor::Ansi(AnsiColor::BrightGreen),
        ThemeColor::BrightYellow => ClapColor::Ansi(AnsiColor::BrightYellow),
        ThemeColor::BrightBlue => ClapColor::Ansi(AnsiColor::BrightBlue),
        ThemeColor::BrightMagenta => ClapColor::Ansi(AnsiColor::BrightMagenta),
        ThemeColor::BrightCyan => ClapColor::Ansi(AnsiColor::BrightCyan),
        ThemeColor::BrightWhite => ClapColor::Ansi(AnsiColor::BrightWhite),
        ThemeColor::TrueColor { r, g, b } => ClapColor::Rgb(RgbColor(r, g, b)),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let matches = build_cli_command().get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(err) => err.exit(),
    };

    match execute(cli).await {
        Ok(()) => {}
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let output = OutputManager::new(GlobalOptions {
        output_format: cli.output,
        quiet: cli.quiet,
        verbose: cli.verbose,
        no_color: cli.no_color,
    });

    match cli.command {
        Commands::Init(args) => handle_init(args, &output)?,
        Commands::Analyze(args) => handle_analyze(args, &output).await?,
        Commands::Schema(command) => handle_schema_commands(command, &output).await?,
        Commands::Drift(command) => handle_drift_commands(command, &output).await?,
        Commands::Migrate(command) => handle_migrate_commands(command, &output).await?,
        Commands::Validate(command) => handle_validate_commands(command, &output).await?,
    }

    Ok(())
}
