//! # Serialização do Modelo
//!
//! Dois formatos com o mesmo conteúdo lógico:
//!
//! - **Binário** (o formato de produção): cabeçalho com magic e versão,
//!   seguido dos registros com comprimentos explícitos — índices de tuplas
//!   por ordem, índice de classes, índice de features com a ordem de cada
//!   uma, flags (JSON embutido), identificador da fábrica de features,
//!   janela e a tabela raga de pesos em f64 little-endian.
//! - **Texto** (despejo de depuração): seções separadas por cabeçalhos
//!   `#`, campos separados por tab. O round-trip
//!   `write_text(read_text(x)) == x` é byte-exato.
//!
//! A leitura rejeita qualquer arquivo cujo prefixo, contagem de registros ou
//! aridade de tuplas discorde do declarado, com um erro de formato que nomeia
//! o registro problemático.

use std::io::{BufRead, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{CrfError, CrfResult};
use crate::flags::Flags;

const MAGIC: &[u8; 8] = b"crfmodel";
const VERSION: u32 = 1;

/// Conteúdo lógico de um modelo serializado.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFile {
    pub flags: Flags,
    /// Classes na ordem dos ids; a primeira posição do fundo é recuperada
    /// pelo `background_symbol` das flags.
    pub classes: Vec<String>,
    /// Features na ordem dos ids, com a ordem de clique de cada uma.
    pub features: Vec<(String, usize)>,
    /// Tuplas por ordem (`label_tuples[o]` tem tuplas de comprimento `o+1`),
    /// na ordem dos ids de tupla.
    pub label_tuples: Vec<Vec<Vec<usize>>>,
    pub factory_id: String,
    pub window: usize,
    /// Tabela raga `θ[f][k]`, uma linha por feature.
    pub weights: Vec<Vec<f64>>,
}

impl ModelFile {
    /// Consistência interna: contagens e aridades devem bater antes de
    /// qualquer uso.
    pub fn validate(&self) -> CrfResult<()> {
        if self.label_tuples.len() != self.window {
            return Err(CrfError::format(format!(
                "expected {} tuple indices, found {}",
                self.window,
                self.label_tuples.len()
            )));
        }
        for (o, tuples) in self.label_tuples.iter().enumerate() {
            if let Some(bad) = tuples.iter().find(|t| t.len() != o + 1) {
                return Err(CrfError::format(format!(
                    "order {o} holds a tuple of arity {} (expected {})",
                    bad.len(),
                    o + 1
                )));
            }
        }
        if self.weights.len() != self.features.len() {
            return Err(CrfError::format(format!(
                "{} weight rows for {} features",
                self.weights.len(),
                self.features.len()
            )));
        }
        for (f, ((name, order), row)) in
            self.features.iter().zip(self.weights.iter()).enumerate()
        {
            if *order >= self.window {
                return Err(CrfError::format(format!(
                    "feature {f} (`{name}`) has order {order} outside the window"
                )));
            }
            let expected = self.label_tuples[*order].len();
            if row.len() != expected {
                return Err(CrfError::format(format!(
                    "feature {f} (`{name}`) has {} weights, expected {expected}",
                    row.len()
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Formato binário
// ---------------------------------------------------------------------------

fn write_string<W: Write>(w: &mut W, s: &str) -> CrfResult<()> {
    w.write_u32::<LittleEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(r: &mut R, what: &str) -> CrfResult<String> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|_| CrfError::format(format!("{what}: invalid UTF-8")))
}

/// Grava o modelo no formato binário versionado.
pub fn write_binary<W: Write>(w: &mut W, model: &ModelFile) -> CrfResult<()> {
    model.validate()?;
    w.write_all(MAGIC)?;
    w.write_u32::<LittleEndian>(VERSION)?;

    // 1. índices de tuplas, um por ordem
    w.write_u32::<LittleEndian>(model.label_tuples.len() as u32)?;
    for (o, tuples) in model.label_tuples.iter().enumerate() {
        w.write_u32::<LittleEndian>((o + 1) as u32)?;
        w.write_u32::<LittleEndian>(tuples.len() as u32)?;
        for tuple in tuples {
            for &label in tuple {
                w.write_u32::<LittleEndian>(label as u32)?;
            }
        }
    }

    // 2. índice de classes
    w.write_u32::<LittleEndian>(model.classes.len() as u32)?;
    for class in &model.classes {
        write_string(w, class)?;
    }

    // 3. índice de features com as ordens
    w.write_u32::<LittleEndian>(model.features.len() as u32)?;
    for (name, order) in &model.features {
        write_string(w, name)?;
        w.write_u32::<LittleEndian>(*order as u32)?;
    }

    // 4. flags como JSON embutido
    let flags_json = serde_json::to_string(&model.flags)
        .map_err(|e| CrfError::format(format!("flags: {e}")))?;
    write_string(w, &flags_json)?;

    // 5. fábrica de features
    write_string(w, &model.factory_id)?;

    // 6. janela
    w.write_u32::<LittleEndian>(model.window as u32)?;

    // 7. pesos ragos
    w.write_u32::<LittleEndian>(model.weights.len() as u32)?;
    for row in &model.weights {
        w.write_u32::<LittleEndian>(row.len() as u32)?;
        for &v in row {
            w.write_f64::<LittleEndian>(v)?;
        }
    }
    Ok(())
}

/// Lê um modelo binário, rejeitando cabeçalho ou contagens inválidas.
pub fn read_binary<R: Read>(r: &mut R) -> CrfResult<ModelFile> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(CrfError::format("bad magic; not a CRF model file"));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(CrfError::format(format!(
            "unsupported model version {version} (expected {VERSION})"
        )));
    }

    let num_orders = r.read_u32::<LittleEndian>()? as usize;
    let mut label_tuples = Vec::with_capacity(num_orders);
    for o in 0..num_orders {
        let arity = r.read_u32::<LittleEndian>()? as usize;
        if arity != o + 1 {
            return Err(CrfError::format(format!(
                "tuple index {o} declares arity {arity} (expected {})",
                o + 1
            )));
        }
        let count = r.read_u32::<LittleEndian>()? as usize;
        let mut tuples = Vec::with_capacity(count);
        for _ in 0..count {
            let mut tuple = Vec::with_capacity(arity);
            for _ in 0..arity {
                tuple.push(r.read_u32::<LittleEndian>()? as usize);
            }
            tuples.push(tuple);
        }
        label_tuples.push(tuples);
    }

    let num_classes = r.read_u32::<LittleEndian>()? as usize;
    let mut classes = Vec::with_capacity(num_classes);
    for _ in 0..num_classes {
        classes.push(read_string(r, "class index")?);
    }

    let num_features = r.read_u32::<LittleEndian>()? as usize;
    let mut features = Vec::with_capacity(num_features);
    for _ in 0..num_features {
        let name = read_string(r, "feature index")?;
        let order = r.read_u32::<LittleEndian>()? as usize;
        features.push((name, order));
    }

    let flags_json = read_string(r, "flags record")?;
    let flags: Flags = serde_json::from_str(&flags_json)
        .map_err(|e| CrfError::format(format!("flags record: {e}")))?;

    let factory_id = read_string(r, "factory id")?;
    let window = r.read_u32::<LittleEndian>()? as usize;

    let num_rows = r.read_u32::<LittleEndian>()? as usize;
    let mut weights = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        let len = r.read_u32::<LittleEndian>()? as usize;
        let mut row = Vec::with_capacity(len);
        for _ in 0..len {
            row.push(r.read_f64::<LittleEndian>()?);
        }
        weights.push(row);
    }

    let model = ModelFile {
        flags,
        classes,
        features,
        label_tuples,
        factory_id,
        window,
        weights,
    };
    model.validate()?;
    Ok(model)
}

// ---------------------------------------------------------------------------
// Despejo em texto
// ---------------------------------------------------------------------------

/// Grava o despejo legível em seções separadas por tab. Determinístico:
/// o mesmo modelo produz sempre os mesmos bytes.
pub fn write_text<W: Write>(w: &mut W, model: &ModelFile) -> CrfResult<()> {
    model.validate()?;
    writeln!(w, "#crf-model\t{VERSION}")?;
    writeln!(w, "#window\t{}", model.window)?;

    writeln!(w, "#classes\t{}", model.classes.len())?;
    for class in &model.classes {
        writeln!(w, "{class}")?;
    }

    writeln!(w, "#features\t{}", model.features.len())?;
    for (name, order) in &model.features {
        writeln!(w, "{name}\t{order}")?;
    }

    writeln!(w, "#tuples\t{}", model.label_tuples.len())?;
    for (o, tuples) in model.label_tuples.iter().enumerate() {
        writeln!(w, "#order\t{o}\t{}", tuples.len())?;
        for tuple in tuples {
            let labels: Vec<String> = tuple.iter().map(|l| l.to_string()).collect();
            writeln!(w, "{}", labels.join("\t"))?;
        }
    }

    let flags_json = serde_json::to_string(&model.flags)
        .map_err(|e| CrfError::format(format!("flags: {e}")))?;
    writeln!(w, "#flags")?;
    writeln!(w, "{flags_json}")?;

    writeln!(w, "#factory")?;
    writeln!(w, "{}", model.factory_id)?;

    writeln!(w, "#weights\t{}", model.weights.len())?;
    for row in &model.weights {
        let values: Vec<String> = row.iter().map(|v| format!("{v:?}")).collect();
        writeln!(w, "{}", values.join("\t"))?;
    }
    Ok(())
}

/// Lê o despejo em texto de volta para um [`ModelFile`].
pub fn read_text<R: BufRead>(r: &mut R) -> CrfResult<ModelFile> {
    let mut lines = r.lines();
    let mut next = |what: &str| -> CrfResult<String> {
        lines
            .next()
            .transpose()?
            .ok_or_else(|| CrfError::format(format!("unexpected end of dump at {what}")))
    };

    let header = next("header")?;
    let version: u32 = section_count(&header, "#crf-model")? as u32;
    if version != VERSION {
        return Err(CrfError::format(format!(
            "unsupported dump version {version}"
        )));
    }
    let window = section_count(&next("window")?, "#window")?;

    let num_classes = section_count(&next("classes")?, "#classes")?;
    let mut classes = Vec::with_capacity(num_classes);
    for _ in 0..num_classes {
        classes.push(next("class")?);
    }

    let num_features = section_count(&next("features")?, "#features")?;
    let mut features = Vec::with_capacity(num_features);
    for _ in 0..num_features {
        let line = next("feature")?;
        let (name, order) = line.rsplit_once('\t').ok_or_else(|| {
            CrfError::format("feature line without an order field")
        })?;
        let order: usize = order
            .parse()
            .map_err(|_| CrfError::format(format!("bad feature order `{order}`")))?;
        features.push((name.to_string(), order));
    }

    let num_orders = section_count(&next("tuples")?, "#tuples")?;
    let mut label_tuples = Vec::with_capacity(num_orders);
    for o in 0..num_orders {
        let header = next("order header")?;
        let mut parts = header.split('\t');
        if parts.next() != Some("#order") {
            return Err(CrfError::format("missing #order header"));
        }
        let declared: usize = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| CrfError::format("bad #order index"))?;
        if declared != o {
            return Err(CrfError::format(format!(
                "tuple sections out of order: expected {o}, found {declared}"
            )));
        }
        let count: usize = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| CrfError::format("bad #order count"))?;
        let mut tuples = Vec::with_capacity(count);
        for _ in 0..count {
            let line = next("tuple")?;
            let tuple: Vec<usize> = line
                .split('\t')
                .map(|l| {
                    l.parse()
                        .map_err(|_| CrfError::format(format!("bad tuple label `{l}`")))
                })
                .collect::<CrfResult<_>>()?;
            tuples.push(tuple);
        }
        label_tuples.push(tuples);
    }

    expect_line(&next("flags header")?, "#flags")?;
    let flags: Flags = serde_json::from_str(&next("flags")?)
        .map_err(|e| CrfError::format(format!("flags record: {e}")))?;

    expect_line(&next("factory header")?, "#factory")?;
    let factory_id = next("factory id")?;

    let num_rows = section_count(&next("weights")?, "#weights")?;
    let mut weights = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        let line = next("weight row")?;
        let row: Vec<f64> = if line.is_empty() {
            Vec::new()
        } else {
            line.split('\t')
                .map(|v| {
                    v.parse()
                        .map_err(|_| CrfError::format(format!("bad weight `{v}`")))
                })
                .collect::<CrfResult<_>>()?
        };
        weights.push(row);
    }

    let model = ModelFile {
        flags,
        classes,
        features,
        label_tuples,
        factory_id,
        window,
        weights,
    };
    model.validate()?;
    Ok(model)
}

fn section_count(line: &str, header: &str) -> CrfResult<usize> {
    match line.split_once('\t') {
        Some((h, count)) if h == header => count
            .parse()
            .map_err(|_| CrfError::format(format!("bad count in `{line}`"))),
        _ => Err(CrfError::format(format!(
            "expected `{header}` section, found `{line}`"
        ))),
    }
}

fn expect_line(line: &str, expected: &str) -> CrfResult<()> {
    if line == expected {
        Ok(())
    } else {
        Err(CrfError::format(format!(
            "expected `{expected}`, found `{line}`"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_model() -> ModelFile {
        ModelFile {
            flags: Flags {
                window: 2,
                ..Flags::default()
            },
            classes: vec!["O".to_string(), "PER".to_string()],
            features: vec![
                ("w=joão".to_string(), 0),
                ("bias".to_string(), 0),
                ("edge1".to_string(), 1),
            ],
            label_tuples: vec![
                vec![vec![0], vec![1]],
                vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]],
            ],
            factory_id: "shape.v1".to_string(),
            window: 2,
            weights: vec![
                vec![0.5, -1.25],
                vec![0.0, 0.125],
                vec![1.0, 2.0, -3.0, 0.0078125],
            ],
        }
    }

    #[test]
    fn test_binary_round_trip() {
        let model = sample_model();
        let mut buf = Vec::new();
        write_binary(&mut buf, &model).unwrap();
        let back = read_binary(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(model, back);
    }

    #[test]
    fn test_text_round_trip_is_byte_equal() {
        let model = sample_model();
        let mut first = Vec::new();
        write_text(&mut first, &model).unwrap();
        let back = read_text(&mut Cursor::new(&first)).unwrap();
        let mut second = Vec::new();
        write_text(&mut second, &back).unwrap();
        assert_eq!(first, second);
        assert_eq!(model, back);
    }

    #[test]
    fn test_bad_magic_is_format_error() {
        let mut buf = Vec::new();
        write_binary(&mut buf, &sample_model()).unwrap();
        buf[0] = b'x';
        assert!(matches!(
            read_binary(&mut Cursor::new(&buf)),
            Err(CrfError::Format(_))
        ));
    }

    #[test]
    fn test_weight_arity_mismatch_is_rejected() {
        let mut model = sample_model();
        model.weights[2].pop();
        let mut buf = Vec::new();
        assert!(write_binary(&mut buf, &model).is_err());
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let mut buf = Vec::new();
        write_binary(&mut buf, &sample_model()).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(read_binary(&mut Cursor::new(&buf)).is_err());
    }
}
