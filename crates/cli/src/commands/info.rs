use color_eyre::owo_colors::OwoColorize;

use crate::{
    commands::doctor::{REQUIRED_TOOLS, on_path},
    config::{CONFIG_FILE_NAME, Config},
    output::OutputBuilder,
};

fn format_path<P: AsRef<std::path::Path>>(path: Option<P>) -> String {
    match path {
        None => "<none>".red().to_string(),
        Some(path) => path.as_ref().to_string_lossy().to_string(),
    }
}

fn format_status(status: bool) -> String {
    if status {
        "Found".green().to_string()
    } else {
        "Not found".red().to_string()
    }
}

pub fn info(config: Config) -> color_eyre::Result<()> {
    let mut output = OutputBuilder::new("Configuration");

    let wemod_exe = config.wemod_exe().ok();

    output.section("WeMod", |builder| {
        builder.property(
            "Status",
            format_status(wemod_exe.as_ref().is_some_and(|exe| exe.is_file())),
        );
        builder.property("Executable", format_path(wemod_exe.as_ref()));
        builder.property("Prefix", format_path(config.prefix_dir().ok()));
    });

    output.property("Work directory", format_path(config.work_dir().ok()));
    output.property("Downloads directory", format_path(config.download_dir().ok()));
    output.property("Log file", format_path(config.log_file()));
    output.property("Log level", config.log_level());
    output.property("Components", config.components().join(", "));
    output.property(
        "Prefix download",
        config.prefix_download_url().unwrap_or("latest release"),
    );

    output.section("Configuration search paths", |builder| {
        for (index, item) in config.known_dirs.config_dirs().enumerate() {
            builder.property(
                format!("{index}"),
                item.join(CONFIG_FILE_NAME).to_string_lossy(),
            );
        }
    });

    output.section("Tools", |builder| {
        for tool in REQUIRED_TOOLS {
            builder.property(tool, format_status(on_path(tool)));
        }
    });

    let steam = config.steam_dir();

    output.section("Steam", |builder| {
        builder.property("Status", format_status(steam.is_ok()));

        if let Ok(steam) = steam {
            builder.property("Path", steam.path().to_string_lossy());
        }
    });

    print!("{}", output.build());

    Ok(())
}
