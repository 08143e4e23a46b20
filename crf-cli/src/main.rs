//! Linha de comando do CRF: treina modelos a partir de arquivos em colunas,
//! rotula texto plano ou colunas e despeja modelos no formato legível.
//!
//! A saída rotulada pode ser `slash` (palavra/CLASSE), `inline-xml`
//! (entidades embrulhadas) ou `standoff-xml` (um elemento por entidade com
//! índices de token). Código de saída 0 em sucesso; falha fatal de E/S ou
//! de carga de modelo termina com código diferente de zero.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crf_core::corpus::{
    read_column_documents, read_plain_text, relabel_documents, write_inline_xml,
    write_slash_tags, write_standoff_xml,
};
use crf_core::{CrfClassifier, Document, Flags, TagScheme};

#[derive(Parser)]
#[command(name = "crf", version, about = "CRF de cadeia linear para marcação de sequências")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// palavra/CLASSE separados por espaço
    Slash,
    /// entidades embrulhadas em elementos XML
    InlineXml,
    /// um elemento <entity> por entidade, com índices de token
    StandoffXml,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SchemeArg {
    Iob1,
    Iob2,
    Ioe,
    Sbieo,
}

impl From<SchemeArg> for TagScheme {
    fn from(s: SchemeArg) -> TagScheme {
        match s {
            SchemeArg::Iob1 => TagScheme::Iob1,
            SchemeArg::Iob2 => TagScheme::Iob2,
            SchemeArg::Ioe => TagScheme::Ioe,
            SchemeArg::Sbieo => TagScheme::Sbieo,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Treina um modelo a partir de um arquivo em colunas
    Train {
        /// Arquivo de treino (colunas separadas por espaço/tab, linhas em
        /// branco separam documentos)
        #[arg(long)]
        train_file: PathBuf,
        /// Arquivo de saída do modelo binário
        #[arg(long)]
        model_out: PathBuf,
        /// Arquivo JSON com as flags completas do classificador
        #[arg(long)]
        flags_file: Option<PathBuf>,
        /// Coluna (0-baseada) da palavra
        #[arg(long, default_value_t = 0)]
        word_column: usize,
        /// Coluna (0-baseada) da classe-ouro
        #[arg(long, default_value_t = 1)]
        gold_column: usize,
        /// Re-rotula as tags-ouro neste esquema antes do treino
        #[arg(long)]
        scheme: Option<SchemeArg>,
    },
    /// Rotula documentos com um modelo treinado
    Label {
        /// Modelo binário treinado
        #[arg(long)]
        model: PathBuf,
        /// Arquivo de entrada; sem ele, lê da entrada padrão
        #[arg(long)]
        input: Option<PathBuf>,
        /// Trata a entrada como arquivo em colunas em vez de texto plano
        #[arg(long, default_value_t = false)]
        column_input: bool,
        /// Coluna da palavra quando `--column-input`
        #[arg(long, default_value_t = 0)]
        word_column: usize,
        /// Formato de saída
        #[arg(long, value_enum, default_value_t = OutputFormat::Slash)]
        format: OutputFormat,
    },
    /// Despeja um modelo binário no formato de texto legível
    Dump {
        /// Modelo binário treinado
        #[arg(long)]
        model: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Train {
            train_file,
            model_out,
            flags_file,
            word_column,
            gold_column,
            scheme,
        } => train(
            train_file,
            model_out,
            flags_file,
            word_column,
            gold_column,
            scheme,
        ),
        Command::Label {
            model,
            input,
            column_input,
            word_column,
            format,
        } => label(model, input, column_input, word_column, format),
        Command::Dump { model } => dump(model),
    }
}

fn load_flags(path: Option<PathBuf>) -> anyhow::Result<Flags> {
    match path {
        None => Ok(Flags::default()),
        Some(path) => {
            let file = File::open(&path)
                .with_context(|| format!("opening flags file {}", path.display()))?;
            let flags: Flags =
                serde_json::from_reader(BufReader::new(file)).context("parsing flags JSON")?;
            Ok(flags)
        }
    }
}

fn load_model(path: &PathBuf) -> anyhow::Result<CrfClassifier> {
    let file =
        File::open(path).with_context(|| format!("opening model {}", path.display()))?;
    CrfClassifier::deserialize(&mut BufReader::new(file))
        .with_context(|| format!("loading model {}", path.display()))
}

fn train(
    train_file: PathBuf,
    model_out: PathBuf,
    flags_file: Option<PathBuf>,
    word_column: usize,
    gold_column: usize,
    scheme: Option<SchemeArg>,
) -> anyhow::Result<()> {
    let flags = load_flags(flags_file)?;
    let file = File::open(&train_file)
        .with_context(|| format!("opening training file {}", train_file.display()))?;
    let mut documents = read_column_documents(BufReader::new(file), word_column, gold_column)
        .context("reading training documents")?;
    if let Some(scheme) = scheme {
        relabel_documents(&mut documents, scheme.into(), &flags.background_symbol);
    }
    info!(documents = documents.len(), "training corpus loaded");

    let mut classifier = CrfClassifier::new(flags)?;
    classifier.train(&documents).context("training failed")?;
    info!(
        features = classifier.num_features(),
        dimension = classifier.dimension(),
        "training finished"
    );

    let out = File::create(&model_out)
        .with_context(|| format!("creating model file {}", model_out.display()))?;
    let mut writer = BufWriter::new(out);
    classifier.serialize(&mut writer)?;
    writer.flush()?;
    Ok(())
}

fn label(
    model: PathBuf,
    input: Option<PathBuf>,
    column_input: bool,
    word_column: usize,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let classifier = load_model(&model)?;

    let mut documents: Vec<Document> = if column_input {
        let reader: Box<dyn Read> = match &input {
            Some(path) => Box::new(
                File::open(path)
                    .with_context(|| format!("opening input {}", path.display()))?,
            ),
            None => Box::new(io::stdin()),
        };
        // A coluna-ouro pode não existir na entrada de inferência; uma
        // coluna fora do alcance só deixa o campo vazio.
        read_column_documents(BufReader::new(reader), word_column, usize::MAX)?
    } else {
        let mut text = String::new();
        match &input {
            Some(path) => {
                File::open(path)
                    .with_context(|| format!("opening input {}", path.display()))?
                    .read_to_string(&mut text)?;
            }
            None => {
                io::stdin().read_to_string(&mut text)?;
            }
        }
        read_plain_text(&text)
    };

    classifier.classify_documents(&mut documents)?;

    let background = &classifier.flags().background_symbol;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for doc in &documents {
        let rendered = match format {
            OutputFormat::Slash => write_slash_tags(doc, background),
            OutputFormat::InlineXml => write_inline_xml(doc, background),
            OutputFormat::StandoffXml => write_standoff_xml(doc, background),
        };
        if !rendered.is_empty() {
            writeln!(out, "{rendered}")?;
        }
    }
    Ok(())
}

fn dump(model: PathBuf) -> anyhow::Result<()> {
    let classifier = load_model(&model)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    classifier.serialize_text(&mut out)?;
    Ok(())
}
