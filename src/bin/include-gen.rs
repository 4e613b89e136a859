use std::env;
use std::process::ExitCode;

use btfc::{generate_header, Btf};

fn usage() {
    eprintln!("Usage:");
    eprintln!("\tinclude-gen /sys/kernel/btf/vmlinux");
    eprintln!("\tinclude-gen /sys/kernel/btf/vmlinux [/sys/kernel/btf/btusb]");
}

fn main() -> ExitCode {
    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() || paths[0] == "--help" {
        usage();
        return ExitCode::SUCCESS;
    }

    let btf = match Btf::from_files(&paths) {
        Ok(btf) => btf,
        Err(e) => {
            eprintln!("Failed to open the BTF file: {e}");
            return ExitCode::FAILURE;
        }
    };

    if btf.count() == 0 {
        eprintln!("No types were found!");
        return ExitCode::FAILURE;
    }

    match generate_header(&btf) {
        Ok(header) => {
            println!("{header}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to generate the header: {e}");
            ExitCode::FAILURE
        }
    }
}
