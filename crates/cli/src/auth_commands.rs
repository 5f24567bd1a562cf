use {
    anyhow::Result,
    clap::Subcommand,
    meshrelay_auth::TokenService,
    meshrelay_config::RelayConfig,
};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Issue a bearer token for a user id without a signed challenge.
    Issue {
        /// User id to bind into the token.
        #[arg(long)]
        user_id: String,
    },
    /// Check a bearer token and print the identity it carries.
    Verify {
        #[arg(long)]
        token: String,
    },
}

pub fn handle_auth(action: AuthAction, config: &RelayConfig) -> Result<()> {
    let tokens = TokenService::from_config(&config.auth);
    match action {
        AuthAction::Issue { user_id } => {
            anyhow::ensure!(!user_id.trim().is_empty(), "user id must not be empty");
            let issued = tokens.issue(&user_id)?;
            println!("{}", issued.token);
            eprintln!("expires in {}s", issued.expires_in);
            Ok(())
        },
        AuthAction::Verify { token } => {
            let identity = tokens.validate(&token)?;
            println!("{identity}");
            Ok(())
        },
    }
}
