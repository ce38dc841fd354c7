//! CLI commands and argument parsing.

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use crate::config::ENC_IDS;
use crate::enc::EncryptionContext;
use crate::key::{Key, KeyStore};
use crate::types::Mode;
use crate::xml::Document;

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Encrypt data into an EncryptedData template.
    Encrypt {
        /// Template file holding the EncryptedData skeleton.
        #[arg(short, long)]
        template: PathBuf,

        /// Binary file whose bytes get encrypted.
        #[arg(long)]
        data: Option<PathBuf>,

        /// XML document holding the element to encrypt in place.
        #[arg(long)]
        doc: Option<PathBuf>,

        /// Id of the target element inside --doc.
        #[arg(long)]
        node: Option<String>,

        /// URI whose bytes get encrypted.
        #[arg(long)]
        uri: Option<String>,

        /// Output file (stdout if omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Key as name=HEX; may repeat.
        #[arg(short, long = "key")]
        keys: Vec<String>,

        /// Dump the context to stderr after the operation.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Decrypt an EncryptedData instance.
    Decrypt {
        /// Document holding the EncryptedData element.
        #[arg(short, long)]
        input: PathBuf,

        /// Id of the EncryptedData element (document root if omitted).
        #[arg(long)]
        node: Option<String>,

        /// Output file (stdout if omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Key as name=HEX; may repeat.
        #[arg(short, long = "key")]
        keys: Vec<String>,

        /// Dump the context to stderr after the operation.
        #[arg(short, long)]
        verbose: bool,
    },
}

/// XML Encryption processor.
#[derive(Parser)]
#[command(name = "xmlenc", version = "0.4.0", about = "Encrypt and decrypt XML elements, element content, and binary data per the W3C XML Encryption recommendation.")]
pub struct App {
    #[command(subcommand)]
    command: Commands,
}

impl App {
    /// Initializes logging and parses the command line.
    pub fn init() -> Result<Self> {
        let subscriber = tracing_subscriber::fmt().with_file(true).with_line_number(true).finish();
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(Self::parse())
    }

    /// Runs the parsed command.
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Encrypt { template, data, doc, node, uri, output, keys, verbose } => run_encrypt(&template, data, doc, node, uri, output, &keys, verbose),
            Commands::Decrypt { input, node, output, keys, verbose } => run_decrypt(&input, node, output, &keys, verbose),
        }
    }
}

#[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
fn run_encrypt(template: &Path, data: Option<PathBuf>, doc: Option<PathBuf>, node: Option<String>, uri: Option<String>, output: Option<PathBuf>, keys: &[String], verbose: bool) -> Result<()> {
    let store = parse_keys(keys)?;
    let tmpl_doc = load_document(template)?;
    let mut ctx = EncryptionContext::new(Mode::EncryptedData, store);

    let serialized = match (data, doc, uri) {
        (Some(data), None, None) => {
            let payload = std::fs::read(&data).with_context(|| format!("reading {}", data.display()))?;
            let mut doc = tmpl_doc;
            let tmpl = doc.root();
            ctx.encrypt_binary(&mut doc, tmpl, &payload)?;
            doc.serialize()?
        }
        (None, Some(path), None) => {
            let node = node.context("--doc requires --node with the Id of the target element")?;
            let mut doc = load_document(&path)?;
            let root = doc.root();
            doc.register_ids(root, ENC_IDS);
            let target = doc.element_by_id(&node).with_context(|| format!("no element with Id \"{node}\" in {}", path.display()))?;
            let tmpl = doc.import_subtree(&tmpl_doc, tmpl_doc.root());
            ctx.encrypt_xml(&mut doc, tmpl, target)?;
            doc.serialize()?
        }
        (None, None, Some(uri)) => {
            let mut doc = tmpl_doc;
            let tmpl = doc.root();
            ctx.encrypt_uri(&mut doc, tmpl, &uri)?;
            doc.serialize()?
        }
        _ => bail!("exactly one of --data, --doc, or --uri must be given"),
    };

    if verbose {
        ctx.dump(&mut std::io::stderr())?;
    }
    write_output(output.as_deref(), &serialized)
}

fn run_decrypt(input: &Path, node: Option<String>, output: Option<PathBuf>, keys: &[String], verbose: bool) -> Result<()> {
    let store = parse_keys(keys)?;
    let mut doc = load_document(input)?;
    let root = doc.root();
    let target = match node {
        Some(id) => {
            doc.register_ids(root, ENC_IDS);
            doc.element_by_id(&id).with_context(|| format!("no element with Id \"{id}\" in {}", input.display()))?
        }
        None => root,
    };

    let mut ctx = EncryptionContext::new(Mode::EncryptedData, store);
    let replaced = ctx.decrypt(&mut doc, target)?;
    let bytes = if replaced { doc.serialize()? } else { ctx.result().context("decryption produced no result")?.to_vec() };

    if verbose {
        ctx.dump(&mut std::io::stderr())?;
    }
    write_output(output.as_deref(), &bytes)
}

fn parse_keys(entries: &[String]) -> Result<KeyStore> {
    let mut store = KeyStore::new();
    for entry in entries {
        let (name, material) = entry.split_once('=').with_context(|| format!("key \"{entry}\" is not of the form name=HEX"))?;
        let material = hex::decode(material.trim()).with_context(|| format!("key \"{name}\" holds invalid hex"))?;
        store.insert(Key::symmetric(name, &material));
    }
    Ok(store)
}

fn load_document(path: &Path) -> Result<Document> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Document::parse_bytes(&bytes).with_context(|| format!("parsing {}", path.display()))
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display())),
        None => {
            let mut stdout = std::io::stdout();
            stdout.write_all(bytes)?;
            stdout.write_all(b"\n")?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keys() {
        let store = parse_keys(&["k1=00112233445566778899aabbccddeeff".to_owned()]).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_parse_keys_rejects_bad_specs() {
        assert!(parse_keys(&["missing-separator".to_owned()]).is_err());
        assert!(parse_keys(&["k1=nothex".to_owned()]).is_err());
    }
}
