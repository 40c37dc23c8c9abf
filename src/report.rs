use std::fmt::Write;
use std::path::Path;

use serde::Serialize;

use crate::models::{PerformanceResult, ReportCard, ReportCardRow, BIMESTERS};

pub const MISSING: &str = "-";
pub const NO_DATA: &str = "Sem Dados";

fn figure(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(value) => format!("{value:.decimals$}"),
        None => MISSING.to_string(),
    }
}

fn percent(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.1}%"),
        None => MISSING.to_string(),
    }
}

fn has_data(performance: &PerformanceResult) -> bool {
    performance.has_grades() || performance.total_lessons > 0
}

fn final_average(performance: &PerformanceResult) -> Option<f64> {
    performance.has_grades().then_some(performance.final_average)
}

fn attendance(performance: &PerformanceResult) -> Option<f64> {
    (performance.total_lessons > 0).then_some(performance.attendance)
}

fn situation(performance: &PerformanceResult) -> &'static str {
    if has_data(performance) {
        performance.situation.label()
    } else {
        NO_DATA
    }
}

pub fn render_boletim(card: &ReportCard) -> String {
    let mut output = String::new();
    let student_label = card
        .student_name
        .clone()
        .unwrap_or_else(|| card.student_id.to_string());

    let _ = writeln!(output, "# Boletim");
    let _ = writeln!(output, "Aluno: {student_label}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Disciplinas");

    if card.rows.is_empty() {
        let _ = writeln!(output, "Nenhum diário encontrado para este aluno.");
    } else {
        let _ = writeln!(
            output,
            "| Disciplina | Bim. | 1º | 2º | 3º | 4º | Média | Frequência | Aulas | Faltas \
             | Situação |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|---|---|---|---|---|");
        for row in &card.rows {
            let p = &row.performance;
            let bimesters: Vec<String> = p
                .bimester_averages
                .iter()
                .map(|avg| figure(*avg, 1))
                .collect();
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |",
                row.subject_name,
                row.bimester,
                bimesters[0],
                bimesters[1],
                bimesters[2],
                bimesters[3],
                figure(final_average(p), 2),
                percent(attendance(p)),
                p.total_lessons,
                p.absent_count,
                situation(p),
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Resumo");
    if card.contributing_journals == 0 {
        let _ = writeln!(output, "- Média geral: {MISSING}");
        let _ = writeln!(output, "- Frequência geral: {MISSING}");
    } else {
        let _ = writeln!(output, "- Média geral: {:.2}", card.overall_average);
        let _ = writeln!(output, "- Frequência geral: {:.1}%", card.overall_attendance);
    }
    let _ = writeln!(
        output,
        "- Disciplinas com notas: {} de {}",
        card.contributing_journals,
        card.rows.len()
    );
    let _ = writeln!(output, "- Ocorrências registradas: {}", card.occurrence_count);

    output
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    disciplina: &'a str,
    bimestre: u8,
    media_1: String,
    media_2: String,
    media_3: String,
    media_4: String,
    media_final: String,
    frequencia: String,
    aulas: usize,
    presencas: usize,
    faltas: usize,
    justificadas: usize,
    situacao: &'static str,
}

impl<'a> From<&'a ReportCardRow> for CsvRow<'a> {
    fn from(row: &'a ReportCardRow) -> Self {
        let p = &row.performance;
        let [first, second, third, fourth]: [String; BIMESTERS] =
            p.bimester_averages.map(|avg| figure(avg, 1));
        Self {
            disciplina: &row.subject_name,
            bimestre: row.bimester,
            media_1: first,
            media_2: second,
            media_3: third,
            media_4: fourth,
            media_final: figure(final_average(p), 2),
            frequencia: figure(attendance(p), 1),
            aulas: p.total_lessons,
            presencas: p.present_count,
            faltas: p.absent_count,
            justificadas: p.excused_count,
            situacao: situation(p),
        }
    }
}

pub fn write_boletim_csv<W: std::io::Write>(card: &ReportCard, writer: W) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in &card.rows {
        csv.serialize(CsvRow::from(row))?;
    }
    csv.flush()?;
    Ok(())
}

pub fn export_boletim_csv(card: &ReportCard, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    write_boletim_csv(card, file)
}
