//! Creates a new `fastdevl` filesystem image file.

use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::exit;

use fastdevl::FormatOptions;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
	/// The name of the current program used in command line.
	prog: String,

	/// If true, print command line help.
	help: bool,

	/// The path of the image file to create.
	image_path: Option<PathBuf>,
	/// The size of the image, in bytes.
	size: Option<u64>,
	/// The volume label to stamp into the superblock.
	label: Option<String>,
}

fn parse_args() -> Args {
	let mut args: Args = Default::default();
	let mut iter = env::args();

	args.prog = iter.next().unwrap_or_else(|| "mkimg".to_owned());

	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"-h" | "--help" => args.help = true,

			"--size" => {
				let value = iter.next().unwrap_or_else(|| {
					eprintln!("{}: --size requires an argument", args.prog);
					exit(1);
				});
				args.size = Some(value.parse().unwrap_or_else(|_| {
					eprintln!("{}: invalid size `{}`", args.prog, value);
					exit(1);
				}));
			},

			"--label" => {
				args.label = Some(iter.next().unwrap_or_else(|| {
					eprintln!("{}: --label requires an argument", args.prog);
					exit(1);
				}));
			},

			_ => args.image_path = Some(PathBuf::from(arg)),
		}
	}

	args
}

fn print_help(prog: &str) {
	println!("Usage: {prog} [OPTIONS] <image path>");
	println!();
	println!("Options:");
	println!("  --size <bytes>    size of the image to create (required)");
	println!("  --label <name>    volume label to stamp into the superblock");
	println!("  -h, --help        print this help");
}

fn main() {
	env_logger::init();
	let args = parse_args();

	if args.help {
		print_help(&args.prog);
		return;
	}

	let image_path = args.image_path.unwrap_or_else(|| {
		eprintln!("{}: specify a path for the image", args.prog);
		exit(1);
	});
	let size = args.size.unwrap_or_else(|| {
		eprintln!("{}: specify --size", args.prog);
		exit(1);
	});

	let file = OpenOptions::new()
		.write(true)
		.create(true)
		.truncate(true)
		.open(&image_path)
		.unwrap_or_else(|e| {
			eprintln!("{}: {}: {}", args.prog, image_path.display(), e);
			exit(1);
		});
	file.set_len(size).unwrap_or_else(|e| {
		eprintln!("{}: {}: {}", args.prog, image_path.display(), e);
		exit(1);
	});
	drop(file);

	let options = FormatOptions { inode_count: None, label: args.label };
	fastdevl::format(&image_path, options).unwrap_or_else(|e| {
		eprintln!("{}: failed to format {}: {}", args.prog, image_path.display(), e);
		exit(1);
	});
}
