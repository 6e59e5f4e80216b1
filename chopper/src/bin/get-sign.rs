//! Prints the signature stored in a video directory's `data.txt` sidecar.

use failure::Error;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "get-sign")]
struct Opt {
    /// Video directory containing a data.txt sidecar.
    #[structopt(short, long, parse(from_os_str))]
    path: PathBuf,
}

fn run(opt: &Opt) -> Result<String, Error> {
    let sidecar_path = opt.path.join("data.txt");
    let contents = std::fs::read_to_string(&sidecar_path)?;
    let sidecar = stream_core::sidecar::parse(&contents, &sidecar_path.display().to_string())?;
    Ok(sidecar.sign)
}

fn main() {
    let opt = Opt::from_args();
    match run(&opt) {
        Ok(sign) => println!("SHA-1 sign: {}", sign),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
