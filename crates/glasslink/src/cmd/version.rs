use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("glasslink {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!(
        "target: {}",
        option_env!("GLASSLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("os: {}", std::env::consts::OS);
    println!("arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: btleplug={}, serde={}, cli=true",
        cfg!(feature = "btleplug"),
        cfg!(feature = "serde")
    );
    println!(
        "defaults: mtu={}, reply_timeout={:?}",
        glasslink_channel::DEFAULT_MTU,
        glasslink_channel::ChannelConfig::default().reply_timeout
    );

    Ok(SUCCESS)
}
