use csv_fetch::{read_table, ReadOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let location = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data/sample.csv.gz".to_string());

    let table = read_table(&location, &ReadOptions::default()).await?;

    println!("{} rows x {} columns", table.num_rows(), table.num_columns());
    for column in &table.columns {
        println!("  {}: {}", column.name, column.values.dtype());
    }
    Ok(())
}
