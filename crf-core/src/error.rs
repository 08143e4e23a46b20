//! # Taxonomia de Erros do Motor CRF
//!
//! Todos os caminhos falíveis do motor retornam [`CrfResult`]. A taxonomia
//! separa erros de configuração (fatais, do usuário), erros de formato do
//! modelo serializado, erros nos dados de entrada, erros numéricos internos
//! (NaN/∞ vindos do objetivo ou da calibração) e falhas de E/S.
//!
//! O caminho de predição nunca entra em pânico para entrada bem-formada:
//! documento vazio produz sequência vazia, features desconhecidas são
//! simplesmente descartadas.

use thiserror::Error;

/// Alias de resultado usado em todo o motor.
pub type CrfResult<T> = Result<T, CrfError>;

/// Erros produzidos pelo motor CRF.
#[derive(Debug, Error)]
pub enum CrfError {
    /// Combinação de flags inválida ou seleção não suportada
    /// (otimizador, inferência, annealing).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Modelo serializado malformado: cabeçalho, contagem de registros ou
    /// aridade de tuplas em desacordo com o declarado.
    #[error("malformed model file: {0}")]
    Format(String),

    /// Dados de entrada inconsistentes: classe-ouro desconhecida,
    /// desalinhamento de aridade nos índices de tuplas.
    #[error("invalid data: {0}")]
    Data(String),

    /// NaN ou ±∞ produzido pelo objetivo, pela verossimilhança ou pelo
    /// gradiente. Erro de programação ou divergência numérica do treino.
    #[error("numeric failure: {0}")]
    Numeric(String),

    /// Falha de E/S ao ler/escrever modelo ou documentos.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl CrfError {
    /// Atalho para erros de configuração.
    pub fn config(msg: impl Into<String>) -> Self {
        CrfError::Config(msg.into())
    }

    /// Atalho para erros de formato de serialização.
    pub fn format(msg: impl Into<String>) -> Self {
        CrfError::Format(msg.into())
    }

    /// Atalho para erros de dados.
    pub fn data(msg: impl Into<String>) -> Self {
        CrfError::Data(msg.into())
    }

    /// Atalho para erros numéricos.
    pub fn numeric(msg: impl Into<String>) -> Self {
        CrfError::Numeric(msg.into())
    }
}
