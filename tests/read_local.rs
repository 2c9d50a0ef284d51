use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use async_compression::tokio::bufread::{
    BzEncoder, DeflateEncoder, GzipEncoder, XzEncoder, ZstdEncoder,
};
use csv_fetch::{
    read_table, read_table_from, Compression, DType, Engine, HeaderMode, ReadError, ReadOptions,
    Table,
};
use tokio::io::AsyncReadExt;

/// Reference table, same shape as the tips dataset.
const TIPS_CSV: &str = "total_bill,tip,day,size\n\
16.99,1.01,Sun,2\n\
10.34,1.66,Sun,3\n\
21.01,3.50,Sun,3\n\
23.68,3.31,Sun,2\n\
24.59,3.61,Sun,4\n\
25.29,4.71,Mon,4\n\
8.77,2.00,Mon,2\n\
26.88,3.12,Mon,4\n\
15.04,1.96,Mon,2\n\
14.78,3.23,Tue,2\n\
10.27,1.71,Tue,2\n\
35.26,5.00,Tue,4\n\
15.42,1.57,Wed,2\n\
18.43,3.00,Wed,4\n\
14.83,3.02,Thu,2\n\
21.58,3.92,Thu,2\n\
10.33,1.67,Thu,3\n\
16.29,3.71,Fri,3\n\
16.97,3.50,Fri,3\n\
20.65,3.35,Sat,3\n\
17.92,4.08,Sat,2\n\
20.29,2.75,Sat,2\n\
15.77,2.23,Sat,2\n\
39.42,7.58,Sat,4\n";

async fn compress(codec: Compression, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    match codec {
        Compression::Gzip => GzipEncoder::new(data).read_to_end(&mut out).await.unwrap(),
        Compression::Bz2 => BzEncoder::new(data).read_to_end(&mut out).await.unwrap(),
        Compression::Xz => XzEncoder::new(data).read_to_end(&mut out).await.unwrap(),
        Compression::Zstd => ZstdEncoder::new(data).read_to_end(&mut out).await.unwrap(),
        other => panic!("no encoder for {other:?}"),
    };
    out
}

/// Minimal single-entry zip archive with a deflated body.
async fn zip_archive(name: &str, data: &[u8], crc: u32) -> Vec<u8> {
    let mut deflated = Vec::new();
    DeflateEncoder::new(data)
        .read_to_end(&mut deflated)
        .await
        .unwrap();
    let mut out = Vec::new();
    out.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]);
    out.extend_from_slice(&20u16.to_le_bytes()); // version needed
    out.extend_from_slice(&0u16.to_le_bytes()); // flags
    out.extend_from_slice(&8u16.to_le_bytes()); // method: deflate
    out.extend_from_slice(&0u16.to_le_bytes()); // mod time
    out.extend_from_slice(&0u16.to_le_bytes()); // mod date
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&(deflated.len() as u32).to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // extra len
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&deflated);
    out
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn options(engine: Engine) -> ReadOptions {
    ReadOptions {
        engine,
        ..ReadOptions::default()
    }
}

async fn expected_table(engine: Engine) -> Table {
    read_table_from(TIPS_CSV.as_bytes(), "tips.csv", &options(engine))
        .await
        .unwrap()
}

#[tokio::test]
async fn parses_reference_table_and_infers_types() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "tips.csv", TIPS_CSV.as_bytes());

    for engine in [Engine::Fast, Engine::Flexible] {
        let table = read_table(path.to_str().unwrap(), &options(engine)).await?;
        assert_eq!(table.num_rows(), 24);
        assert_eq!(table.column_names(), vec!["total_bill", "tip", "day", "size"]);
        assert_eq!(table.column("total_bill").unwrap().values.dtype(), DType::Float64);
        assert_eq!(table.column("tip").unwrap().values.dtype(), DType::Float64);
        assert_eq!(table.column("day").unwrap().values.dtype(), DType::Utf8);
        assert_eq!(table.column("size").unwrap().values.dtype(), DType::Int64);

        let bills = table.column("total_bill").unwrap().values.as_float64().unwrap();
        assert_eq!(bills[0], Some(16.99));
        let sizes = table.column("size").unwrap().values.as_int64().unwrap();
        assert_eq!(sizes[4], Some(4));
    }
    Ok(())
}

#[tokio::test]
async fn explicit_codec_matches_inferred_extension() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cases = [
        (Compression::Gzip, "tips.csv.gz"),
        (Compression::Bz2, "tips.csv.bz2"),
        (Compression::Xz, "tips.csv.xz"),
        (Compression::Zstd, "tips.csv.zst"),
    ];
    for engine in [Engine::Fast, Engine::Flexible] {
        let expected = expected_table(engine).await;
        for (codec, name) in cases {
            let encoded = compress(codec, TIPS_CSV.as_bytes()).await;
            let inferred_path = write_file(dir.path(), name, &encoded);
            // Extension carries no codec hint here; only the explicit option
            // can decode it.
            let explicit_path = write_file(dir.path(), "tips.bin", &encoded);

            let inferred =
                read_table(inferred_path.to_str().unwrap(), &options(engine)).await?;
            let explicit = read_table(
                explicit_path.to_str().unwrap(),
                &ReadOptions {
                    compression: codec,
                    ..options(engine)
                },
            )
            .await?;

            assert_eq!(inferred, expected, "{name} inferred");
            assert_eq!(explicit, expected, "{name} explicit");
        }
    }
    Ok(())
}

#[tokio::test]
async fn reads_single_entry_zip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let archive = zip_archive("tips.csv", TIPS_CSV.as_bytes(), crc32(TIPS_CSV.as_bytes())).await;
    let path = write_file(dir.path(), "tips.csv.zip", &archive);

    for engine in [Engine::Fast, Engine::Flexible] {
        let expected = expected_table(engine).await;
        let table = read_table(path.to_str().unwrap(), &options(engine)).await?;
        assert_eq!(table, expected);
    }
    Ok(())
}

#[tokio::test]
async fn zip_crc_mismatch_is_a_decode_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let archive = zip_archive("tips.csv", TIPS_CSV.as_bytes(), 0xdeadbeef).await;
    let path = write_file(dir.path(), "tips.csv.zip", &archive);

    let err = read_table(path.to_str().unwrap(), &options(Engine::Fast))
        .await
        .unwrap_err();
    match err {
        ReadError::Decode { codec, .. } => assert_eq!(codec, "zip"),
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn mismatched_codec_is_a_decode_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "tips.csv", TIPS_CSV.as_bytes());

    let err = read_table(
        path.to_str().unwrap(),
        &ReadOptions {
            compression: Compression::Gzip,
            ..ReadOptions::default()
        },
    )
    .await
    .unwrap_err();
    match err {
        ReadError::Decode { codec, .. } => assert_eq!(codec, "gzip"),
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn nrows_returns_reference_prefix() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let prefix: String = TIPS_CSV.lines().take(11).collect::<Vec<_>>().join("\n") + "\n";

    for engine in [Engine::Fast, Engine::Flexible] {
        let expected = read_table_from(
            Cursor::new(prefix.clone().into_bytes()),
            "tips.csv",
            &options(engine),
        )
        .await?;
        assert_eq!(expected.num_rows(), 10);

        for codec in [Compression::None, Compression::Gzip, Compression::Bz2] {
            let (name, bytes) = match codec {
                Compression::None => ("tips.csv".to_string(), TIPS_CSV.as_bytes().to_vec()),
                Compression::Gzip => ("tips.csv.gz".to_string(), compress(codec, TIPS_CSV.as_bytes()).await),
                _ => ("tips.csv.bz2".to_string(), compress(codec, TIPS_CSV.as_bytes()).await),
            };
            let path = write_file(dir.path(), &name, &bytes);
            let table = read_table(
                path.to_str().unwrap(),
                &ReadOptions {
                    nrows: Some(10),
                    ..options(engine)
                },
            )
            .await?;
            assert_eq!(table, expected, "{name}");
        }
    }
    Ok(())
}

#[tokio::test]
async fn latin1_encoding_decodes_exact_characters() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut lines = Vec::new();
    for i in 0..20 {
        if i == 15 {
            lines.push(format!("{i},Á köldum klaka (Cold Fever) (1994)"));
        } else {
            lines.push(format!("{i},title {i}"));
        }
    }
    let text = lines.join("\n") + "\n";
    let bytes: Vec<u8> = text.chars().map(|c| c as u32 as u8).collect();
    let path = write_file(dir.path(), "unicode.csv", &bytes);

    let table = read_table(
        path.to_str().unwrap(),
        &ReadOptions {
            header: HeaderMode::None,
            encoding: encoding_rs::Encoding::for_label(b"latin1").unwrap(),
            ..ReadOptions::default()
        },
    )
    .await?;

    assert_eq!(table.column_names(), vec!["0", "1"]);
    let titles = table.column("1").unwrap().values.as_utf8().unwrap();
    assert_eq!(
        titles[15].as_deref(),
        Some("Á köldum klaka (Cold Fever) (1994)")
    );
    Ok(())
}

#[tokio::test]
async fn tab_separator() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let data = "name\tsalary\nalice\t120\nbob\t95\n";
    let path = write_file(dir.path(), "salaries.csv", data.as_bytes());

    for engine in [Engine::Fast, Engine::Flexible] {
        let table = read_table(
            path.to_str().unwrap(),
            &ReadOptions {
                separator: b'\t',
                ..options(engine)
            },
        )
        .await?;
        assert_eq!(table.column_names(), vec!["name", "salary"]);
        assert_eq!(
            table.column("salary").unwrap().values.as_int64().unwrap(),
            &[Some(120), Some(95)]
        );
    }
    Ok(())
}

#[tokio::test]
async fn dtype_override_and_failure() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "tips.csv", TIPS_CSV.as_bytes());

    let mut dtypes = HashMap::new();
    dtypes.insert("size".to_string(), DType::Float64);
    let table = read_table(
        path.to_str().unwrap(),
        &ReadOptions {
            dtypes,
            ..ReadOptions::default()
        },
    )
    .await?;
    assert_eq!(table.column("size").unwrap().values.dtype(), DType::Float64);

    let mut dtypes = HashMap::new();
    dtypes.insert("day".to_string(), DType::Int64);
    let err = read_table(
        path.to_str().unwrap(),
        &ReadOptions {
            dtypes,
            ..ReadOptions::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ReadError::ColumnType { row: 0, .. }));
    Ok(())
}

#[tokio::test]
async fn invalid_utf8_reports_offset() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    // 0xFF at byte offset 6
    let path = write_file(dir.path(), "bad.csv", b"a,b\n1,\xffx\n");

    for engine in [Engine::Fast, Engine::Flexible] {
        let err = read_table(path.to_str().unwrap(), &options(engine))
            .await
            .unwrap_err();
        match err {
            ReadError::Encoding { offset, .. } => assert_eq!(offset, 6),
            other => panic!("unexpected error: {other}"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn ragged_rows_split_the_engines() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "ragged.csv", b"a,b\n1,2\n3,4,5\n6,7\n");

    let err = read_table(path.to_str().unwrap(), &options(Engine::Fast))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::MalformedRow { row: 1, .. }));

    let table = read_table(path.to_str().unwrap(), &options(Engine::Flexible)).await?;
    assert_eq!(table.num_rows(), 3);
    Ok(())
}

#[tokio::test]
async fn missing_file_is_not_found() {
    let err = read_table("/no/such/dir/tips.csv", &ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::NotFound(_)));
}

#[tokio::test]
async fn header_only_and_empty_inputs() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let header_only = write_file(dir.path(), "header.csv", b"a,b\n");
    let empty = write_file(dir.path(), "empty.csv", b"");

    for engine in [Engine::Fast, Engine::Flexible] {
        let table = read_table(header_only.to_str().unwrap(), &options(engine)).await?;
        assert_eq!(table.column_names(), vec!["a", "b"]);
        assert_eq!(table.num_rows(), 0);

        let table = read_table(empty.to_str().unwrap(), &options(engine)).await?;
        assert_eq!(table.num_columns(), 0);
        assert_eq!(table.num_rows(), 0);
    }
    Ok(())
}
