/*!
# CSV export of MCMC output

Enabled via the `csv` feature.
*/

use std::fs::File;
use std::path::Path;

use csv::Writer;

use crate::error::Result;
use crate::mcmc::McmcSamples;

/**
Saves the kept samples of one or more chains as a CSV file.

The file has a header row with `"chain"`, `"sample"` and one column per fit
parameter, followed by one row per kept sample of each chain in turn.

```rust
use binfit::histogram::AxisCollection;
use binfit::io::save_samples_csv;
use binfit::mcmc::McmcSamples;

let mut samples = McmcSamples::new(vec!["norm".to_string()], AxisCollection::new(), 0, 1, 10)?;
samples.fill(&[("norm".to_string(), 2.0)].into_iter().collect(), -1.0, true)?;

let path = std::env::temp_dir().join("binfit_samples_doc.csv");
save_samples_csv(&[&samples], &path)?;
assert_eq!(std::fs::read_to_string(&path)?, "chain,sample,norm\n0,0,2\n");
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_samples_csv<P: AsRef<Path>>(chains: &[&McmcSamples], path: P) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(path)?);
    let names = chains.first().map_or(&[][..], |c| c.parameter_names());

    let mut header = vec!["chain".to_string(), "sample".to_string()];
    header.extend(names.iter().cloned());
    wtr.write_record(&header)?;

    for (chain_idx, chain) in chains.iter().enumerate() {
        let raw = chain.raw_samples()?;
        for (sample_idx, sample) in raw.outer_iter().enumerate() {
            let mut row = vec![chain_idx.to_string(), sample_idx.to_string()];
            row.extend(sample.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/// Saves every recorded iteration of a chain (burn-in and thinned-out steps
/// included) with its test statistic and acceptance flag. Writes only the
/// header when the chain was not recorded.
pub fn save_chain_csv<P: AsRef<Path>>(samples: &McmcSamples, path: P) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(path)?);

    let mut header = vec!["step".to_string()];
    header.extend(samples.parameter_names().iter().cloned());
    header.push("value".to_string());
    header.push("accepted".to_string());
    wtr.write_record(&header)?;

    for step in samples.chain().unwrap_or_default() {
        let mut row = vec![step.step.to_string()];
        row.extend(step.parameters.iter().map(|v| v.to_string()));
        row.push(step.value.to_string());
        row.push(u8::from(step.accepted).to_string());
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}
