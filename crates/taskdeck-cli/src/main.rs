use std::ffi::OsString;

use taskdeck_core::error::StoreError;

fn main() {
    let args: Vec<OsString> = std::env::args_os().collect();
    if let Err(err) = taskdeck_core::run(args) {
        if err
            .downcast_ref::<StoreError>()
            .is_some_and(StoreError::requires_login)
        {
            eprintln!("error: {err:#}");
            eprintln!("hint: run `taskdeck login <username>` to start a new session");
            std::process::exit(2);
        }
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
