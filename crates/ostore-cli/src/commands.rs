use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use serde_json::{json, Value};

use ostore_sdk::{
    IndexDefinition, IndexKind, IndexValue, NamedIndexValue, ObjectRecord, ObjectService,
    ObjectTypeName, ObjectTypeSchema, RawConstraint, ServiceConfig,
};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    if let Command::Config = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }
    std::fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("creating {}", cli.data_dir.display()))?;
    let service = ObjectService::open_dir(&cli.data_dir, config)?;
    execute(&service, cli.command, cli.format)
}

pub fn execute(svc: &ObjectService, command: Command, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Command::Ns(args) => cmd_ns(svc, args.action, format),
        Command::Type(args) => cmd_type(svc, args.action, format),
        Command::Put(args) => cmd_put(svc, args, format),
        Command::Get(args) => cmd_get(svc, args, format),
        Command::Find(args) => cmd_find(svc, args, format),
        Command::Rm(args) => cmd_rm(svc, args),
        Command::Count(args) => {
            let count = svc.count(&type_name(&args.object_type)?)?;
            emit(format, json!({ "count": count }), || println!("{count}"));
            Ok(())
        }
        Command::List(args) => {
            let records = svc.iterate(&type_name(&args.object_type)?)?;
            print_records(&records, format);
            Ok(())
        }
        Command::Version(args) => {
            let version = svc.version(&type_name(&args.object_type)?)?;
            emit(format, json!({ "version": version }), || println!("{version}"));
            Ok(())
        }
        Command::Truncate(args) => {
            let name = type_name(&args.object_type)?;
            svc.truncate(&name)?;
            println!("{} Truncated {}", "✓".green(), name.to_string().yellow());
            Ok(())
        }
        Command::Config => {
            print!("{}", svc.config().to_toml_string()?);
            Ok(())
        }
    }
}

fn cmd_ns(svc: &ObjectService, action: NsAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        NsAction::Create { name } => {
            svc.create_namespace(&name)?;
            println!("{} Created namespace {}", "✓".green().bold(), name.bold());
        }
        NsAction::Remove { name } => {
            svc.remove_namespace(&name)?;
            println!("{} Removed namespace {}", "✓".green().bold(), name.bold());
        }
        NsAction::List => {
            let namespaces = svc.namespaces()?;
            emit(format, json!(namespaces), || {
                if namespaces.is_empty() {
                    println!("No namespaces.");
                }
                for ns in &namespaces {
                    println!("{ns}");
                }
            });
        }
    }
    Ok(())
}

fn cmd_type(svc: &ObjectService, action: TypeAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        TypeAction::Provision {
            namespace,
            name,
            indexes,
            dependencies,
            unique_key,
        } => {
            let schema = build_schema(&name, &indexes, &dependencies, unique_key)?;
            let provisioned = svc.provision(&namespace, schema)?;
            println!(
                "{} Provisioned {}",
                "✓".green().bold(),
                provisioned.to_string().yellow()
            );
        }
        TypeAction::Remove { object_type } => {
            let name = type_name(&object_type)?;
            svc.unprovision(&name)?;
            println!("{} Removed {}", "✓".green().bold(), name.to_string().yellow());
        }
        TypeAction::List { namespace } => {
            let schemas = svc.object_types(&namespace)?;
            let rendered: Vec<Value> = schemas
                .iter()
                .map(|s| {
                    json!({
                        "name": s.name,
                        "indexes": s.indexes.iter().map(|i| format!("{}:{}", i.name, i.kind)).collect::<Vec<_>>(),
                        "dependencies": s.dependencies,
                        "unique_key": s.requires_unique_key,
                    })
                })
                .collect();
            emit(format, json!(rendered), || {
                for s in &schemas {
                    print!("{}", s.name.yellow().bold());
                    for index in &s.indexes {
                        print!("  {}:{}", index.name, index.kind.to_string().cyan());
                    }
                    if !s.dependencies.is_empty() {
                        print!("  depends on {}", s.dependencies.join(", "));
                    }
                    println!();
                }
            });
        }
    }
    Ok(())
}

fn cmd_put(svc: &ObjectService, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let name = type_name(&args.object_type)?;
    let schema = svc.schema(&name)?;
    let mut record = ObjectRecord {
        id: args.id,
        unique_key: args.key.as_deref().map(decode_key).transpose()?,
        value: args.value.into_bytes(),
        indexes: parse_index_values(&schema, &args.indexes)?,
    };
    let ids = svc.store(&name, std::slice::from_mut(&mut record))?;
    let key = record.unique_key_hex();
    emit(format, json!({ "id": ids[0], "key": key }), || {
        print!("{} Stored {} #{}", "✓".green(), name.to_string().yellow(), ids[0]);
        if let Some(key) = &key {
            print!(" key {}", key.dimmed());
        }
        println!();
    });
    Ok(())
}

fn cmd_get(svc: &ObjectService, args: ObjectRefArgs, format: OutputFormat) -> anyhow::Result<()> {
    let name = type_name(&args.object_type)?;
    let record = match (&args.key, args.id) {
        (Some(key), _) => svc.get_by_key(&name, &decode_key(key)?)?,
        (None, Some(id)) => svc.get(&name, id)?,
        (None, None) => bail!("an ID or --key is required"),
    };
    match record {
        Some(record) => print_records(std::slice::from_ref(&record), format),
        None => bail!("no such object in {name}"),
    }
    Ok(())
}

fn cmd_find(svc: &ObjectService, args: FindArgs, format: OutputFormat) -> anyhow::Result<()> {
    let name = type_name(&args.object_type)?;
    let terms = args
        .terms
        .iter()
        .map(|t| t.parse::<RawConstraint>().map_err(|e| anyhow!(e)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let query = svc.typed_query(&name, &terms, args.top)?;
    if args.ids_only {
        let ids = svc.find_ids(&name, &query)?;
        emit(format, json!(ids), || {
            for id in &ids {
                println!("{id}");
            }
        });
    } else {
        print_records(&svc.find(&name, &query)?, format);
    }
    Ok(())
}

fn cmd_rm(svc: &ObjectService, args: ObjectRefArgs) -> anyhow::Result<()> {
    let name = type_name(&args.object_type)?;
    let removed = match (&args.key, args.id) {
        (Some(key), _) => svc.remove_by_key(&name, &decode_key(key)?)?,
        (None, Some(id)) => svc.remove(&name, id)?,
        (None, None) => bail!("an ID or --key is required"),
    };
    if removed {
        println!("{} Removed from {}", "✓".green(), name.to_string().yellow());
    } else {
        println!("Nothing to remove.");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn type_name(full: &str) -> anyhow::Result<ObjectTypeName> {
    Ok(ObjectTypeName::parse(full)?)
}

fn decode_key(key: &str) -> anyhow::Result<Vec<u8>> {
    hex::decode(key).with_context(|| format!("unique key {key:?} is not hex"))
}

fn build_schema(
    name: &str,
    indexes: &[String],
    dependencies: &[String],
    unique_key: bool,
) -> anyhow::Result<ObjectTypeSchema> {
    let mut schema = ObjectTypeSchema::new(name);
    for definition in indexes {
        let (index, kind) = definition
            .split_once(':')
            .ok_or_else(|| anyhow!("index {definition:?} must be name:kind"))?;
        schema
            .indexes
            .push(IndexDefinition::new(index, kind.parse::<IndexKind>().map_err(|e| anyhow!(e))?));
    }
    schema.dependencies = dependencies.to_vec();
    schema.requires_unique_key = unique_key;
    Ok(schema)
}

/// Parse `name=literal` pairs using the kinds declared in `schema`.
fn parse_index_values(
    schema: &ObjectTypeSchema,
    pairs: &[String],
) -> anyhow::Result<Vec<NamedIndexValue>> {
    pairs
        .iter()
        .map(|pair| {
            let (index, literal) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("index value {pair:?} must be name=literal"))?;
            let definition = schema
                .index(index)
                .ok_or_else(|| anyhow!("{} has no index {index:?}", schema.name))?;
            let value = IndexValue::parse_as(definition.kind, literal).map_err(|e| anyhow!(e))?;
            Ok(NamedIndexValue::new(index, value))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn emit(format: OutputFormat, value: Value, text: impl FnOnce()) {
    match format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Text => text(),
    }
}

fn index_json(value: &IndexValue) -> Value {
    match value {
        IndexValue::Integer(n) => json!(n),
        IndexValue::Float(f) => json!(f),
        IndexValue::Text(s) => json!(s),
        IndexValue::Boolean(b) => json!(b),
    }
}

fn record_json(record: &ObjectRecord) -> Value {
    let indexes: serde_json::Map<String, Value> = record
        .indexes
        .iter()
        .map(|v| (v.name.clone(), index_json(&v.value)))
        .collect();
    json!({
        "id": record.id,
        "key": record.unique_key_hex(),
        "value": String::from_utf8_lossy(&record.value),
        "indexes": indexes,
    })
}

fn print_records(records: &[ObjectRecord], format: OutputFormat) {
    if format == OutputFormat::Json {
        let rendered: Vec<Value> = records.iter().map(record_json).collect();
        println!("{}", json!(rendered));
        return;
    }
    if records.is_empty() {
        println!("No objects.");
    }
    for record in records {
        let id = record.id.map(|id| format!("#{id}")).unwrap_or_default();
        print!("{}  {}", id.yellow().bold(), String::from_utf8_lossy(&record.value));
        for value in &record.indexes {
            print!("  {}={}", value.name.cyan(), value.value);
        }
        if let Some(key) = record.unique_key_hex() {
            print!("  {}", key.dimmed());
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn run(svc: &ObjectService, args: &[&str]) -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(std::iter::once("ostore").chain(args.iter().copied()))?;
        execute(svc, cli.command, cli.format)
    }

    #[test]
    fn schema_from_flags() {
        let schema = build_schema(
            "Order",
            &["qty:int".into(), "sku:text".into()],
            &["Customer".into()],
            true,
        )
        .unwrap();
        assert_eq!(schema.index("qty").map(|i| i.kind), Some(IndexKind::Integer));
        assert!(schema.depends_on("Customer"));
        assert!(schema.requires_unique_key);

        assert!(build_schema("Order", &["qty".into()], &[], false).is_err());
        assert!(build_schema("Order", &["qty:blob".into()], &[], false).is_err());
    }

    #[test]
    fn index_values_typed_by_schema() {
        let schema = ObjectTypeSchema::new("Order")
            .with_index("qty", IndexKind::Integer)
            .with_index("gift", IndexKind::Boolean);
        let values = parse_index_values(&schema, &["qty=7".into(), "gift=true".into()]).unwrap();
        assert_eq!(values[0].value, IndexValue::Integer(7));
        assert_eq!(values[1].value, IndexValue::Boolean(true));

        assert!(parse_index_values(&schema, &["qty=seven".into()]).is_err());
        assert!(parse_index_values(&schema, &["color=red".into()]).is_err());
        assert!(parse_index_values(&schema, &["qty".into()]).is_err());
    }

    #[test]
    fn keys_are_hex() {
        assert_eq!(decode_key("ab01").unwrap(), vec![0xab, 0x01]);
        assert!(decode_key("xyz").is_err());
    }

    #[test]
    fn record_json_shape() {
        let record = ObjectRecord::new("hi")
            .with_id(3)
            .with_unique_key(vec![0xff])
            .with_index("qty", IndexValue::Integer(2));
        let value = record_json(&record);
        assert_eq!(value["id"], 3);
        assert_eq!(value["key"], "ff");
        assert_eq!(value["value"], "hi");
        assert_eq!(value["indexes"]["qty"], 2);
    }

    #[test]
    fn commands_against_a_service() {
        let svc = ObjectService::in_memory(ServiceConfig::default()).unwrap();
        run(&svc, &["ns", "create", "Shop"]).unwrap();
        run(&svc, &["type", "provision", "Shop", "Order", "-i", "qty:integer"]).unwrap();
        run(&svc, &["put", "Shop.Order", "apple", "-i", "qty=2"]).unwrap();
        run(&svc, &["put", "Shop.Order", "pear", "-i", "qty=5", "--key", "beef"]).unwrap();
        run(&svc, &["find", "Shop.Order", "qty>=3", "--format", "json"]).unwrap();
        run(&svc, &["get", "Shop.Order", "--key", "beef"]).unwrap();

        let name = ObjectTypeName::new("Shop", "Order").unwrap();
        assert_eq!(svc.count(&name).unwrap(), 2);
        assert_eq!(svc.version(&name).unwrap(), 2);

        run(&svc, &["rm", "Shop.Order", "1"]).unwrap();
        assert_eq!(svc.count(&name).unwrap(), 1);
        assert!(run(&svc, &["get", "Shop.Order", "1"]).is_err());
        assert!(run(&svc, &["put", "Shop.Order", "x", "-i", "qty=many"]).is_err());

        run(&svc, &["type", "remove", "Shop.Order"]).unwrap();
        assert!(svc.count(&name).is_err());
    }

    #[test]
    fn run_command_uses_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let data = data.to_str().unwrap();
        for args in [
            vec!["ns", "create", "Shop"],
            vec!["type", "provision", "Shop", "Note"],
            vec!["put", "Shop.Note", "remember"],
        ] {
            let argv = ["ostore", "--data-dir", data].into_iter().chain(args);
            run_command(Cli::try_parse_from(argv).unwrap()).unwrap();
        }
        let svc = ObjectService::open_dir(data, ServiceConfig::default()).unwrap();
        let note = svc.get(&ObjectTypeName::new("Shop", "Note").unwrap(), 1).unwrap().unwrap();
        assert_eq!(note.value, b"remember");
    }
}
