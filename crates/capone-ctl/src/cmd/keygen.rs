//! Generate a signature keypair and print it as a config `[core]` block.

use capone_core::error::Result;
use capone_core::keys::SignKeyPair;

pub fn run() -> Result<()> {
    let keys = SignKeyPair::generate();
    println!("[core]");
    println!("public_key = \"{}\"", keys.public.hex());
    println!("secret_key = \"{}\"", keys.secret_hex());
    Ok(())
}
