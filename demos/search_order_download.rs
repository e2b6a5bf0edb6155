use anyhow::Result;
use eodms_rapi::{
    Client, DateRange, DownloadOptions, Filter, GeometrySource, OrderOptions, SearchRequest, SpatialFilter,
};
use std::path::Path;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("eodms_rapi=info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact(),
        )
        .init();

    // Credentials come from EODMS_USER/EODMS_PASSWORD or an `.eodmsrc` file.
    let client = Client::from_env()?;

    let ottawa = GeometrySource::detect(
        "POLYGON ((-75.9 45.2, -75.4 45.2, -75.4 45.5, -75.9 45.5, -75.9 45.2))",
    )?;
    let req = SearchRequest::new("RCM")
        .filter(Filter::new("Beam Mnemonic", "LIKE", ["16M%"]))
        .feature(SpatialFilter::intersects(ottawa))
        .dates(DateRange::new("20240101_000000", "20240201_000000")?)
        .max_results(2);

    println!("{} matching images", client.hit_count(&req)?);
    let records = client.search(&req)?;
    if records.is_empty() {
        return Ok(());
    }

    let items = client.order(&records, &OrderOptions::default())?;
    let done = client.download(&items, Path::new("downloads"), &DownloadOptions::default())?;
    for item in done {
        for path in item.download_paths {
            println!("{}", path.local_destination.display());
        }
    }
    Ok(())
}
