use console::style;

use crate::config::{Config, Context};
use crate::error::Result;

pub async fn show(ctx: &Context) -> Result<()> {
    println!("{}", style(format!("Context {}", ctx.name)).bold().cyan());
    println!();
    println!("  Type:         {}", style(ctx.kind).white());
    println!("  Project:      {}", style(&ctx.project_name).white());
    println!("  Project dir:  {}", style(&ctx.project_dir).white());
    println!("  Docker:       {}", style(&ctx.docker_socket).dim());
    print!("  Profile:      ");
    match &ctx.profile {
        Some(p) => println!("{}", style(p).white()),
        None => println!("{}", style("(none)").dim()),
    }

    println!(
        "  Database:     {}",
        style(format!(
            "{}@{}/{} (password: {})",
            ctx.database_user, ctx.database_service, ctx.database_name, ctx.database_password_secret
        ))
        .white()
    );

    if ctx.is_remote() {
        println!(
            "  SSH:          {}",
            style(format!("{}@{}:{}", ctx.ssh_user, ctx.ssh_hostname, ctx.ssh_port)).white()
        );
        println!("  SSH key:      {}", style(&ctx.ssh_key_path).dim());
        println!(
            "  Sudo:         {}",
            if ctx.run_sudo {
                style("enabled").green()
            } else {
                style("disabled").dim()
            }
        );
    }

    println!();
    println!("Config file: {}", style(Config::config_path()?.display()).dim());

    Ok(())
}
