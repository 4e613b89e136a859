use std::env;
use std::process::ExitCode;

use btfc::Btf;

fn usage() {
    eprintln!("Usage:");
    eprintln!("\tdump-btf /sys/kernel/btf/vmlinux");
    eprintln!("\tdump-btf /sys/kernel/btf/vmlinux [/sys/kernel/btf/btusb]");
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
        println!("No types were found!");
        return ExitCode::FAILURE;
    }

    for (id, r#type) in btf.iter() {
        println!("[{id}] {} {}", r#type.kind(), r#type);
    }

    ExitCode::SUCCESS
}
