use clap::Args;
use std::path::PathBuf;

use microscopy_dropbox::extractor::MetadataExtractor;
use microscopy_dropbox::reader::FormatReaders;
use microscopy_dropbox::slices;

#[derive(Args, Clone)]
pub struct InspectArgs {
    /// Microscope file to read
    pub file: PathBuf,

    /// Series to print: "all" or comma-separated indices/slices, e.g. "0:3, 5"
    #[arg(long, default_value = "all")]
    pub series: String,

    /// Print the stored XML form instead of JSON
    #[arg(long)]
    pub xml: bool,
}

pub fn run(
    args: InspectArgs,
    progress: impl Fn(f64, &str),
) -> Result<(), Box<dyn std::error::Error>> {
    let readers = FormatReaders;
    let extractor = MetadataExtractor::new(&readers);
    let all = extractor.extract(&args.file)?;
    let picked = slices::parse_selection(&args.series, all.len())?;
    eprintln!(
        "{}: {} series, printing {}",
        args.file.display(),
        all.len(),
        picked.len()
    );

    let total = picked.len().max(1) as f64;
    let mut bags = Vec::with_capacity(picked.len());
    for (i, &n) in picked.iter().enumerate() {
        progress(i as f64 / total, &format!("Series {}", n));
        let attributes = all[n].to_attributes();
        if args.xml {
            println!("{}", attributes.to_xml()?);
        } else {
            bags.push(attributes);
        }
    }
    if !args.xml {
        println!("{}", serde_json::to_string_pretty(&bags)?);
    }
    progress(1.0, "Done");
    Ok(())
}
