use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, Level};

use crate::display::display_path;
use crate::error::{AppError, PathError};
use crate::graph::UnweightedGraph;
use crate::path_finder::PathFinder;
use crate::vertex_index::VertexNameIndex;

mod error {
    use std::path::PathBuf;

    use thiserror::Error;

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum GraphError {
        #[error("vertex {vertex} does not exist (graph has {vertex_count} vertices)")]
        UnknownVertex { vertex: usize, vertex_count: usize },
    }

    // anything that goes wrong reading the node and edge files
    #[derive(Debug, Error)]
    pub enum LoadError {
        #[error("can't open {}: {source}", path.display())]
        Io {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("malformed record in {}: {source}", path.display())]
        Csv {
            path: PathBuf,
            #[source]
            source: csv::Error,
        },
        #[error("{}:{line}: expected two tab-separated names", path.display())]
        MissingField { path: PathBuf, line: u64 },
        #[error("{}:{line}: {name:?} is not valid URL-encoded UTF-8", path.display())]
        Decode { path: PathBuf, line: u64, name: String },
        #[error("name {name:?} is used by both vertex {first} and vertex {second}")]
        DuplicateName {
            name: String,
            first: usize,
            second: usize,
        },
        #[error("{}:{line}: edge endpoint {name:?} is not in the node file", path.display())]
        UnknownEdgeEndpoint {
            path: PathBuf,
            line: u64,
            name: String,
        },
        #[error(transparent)]
        Graph(#[from] GraphError),
    }

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum PathError {
        #[error("no vertex is named {0:?}")]
        UnknownVertex(String),
        #[error("vertex {0} has no name in the index")]
        UnnamedVertex(usize),
        // Only reachable through a bookkeeping bug in the search.
        #[error("predecessor chain is broken at vertex {vertex}")]
        BrokenPredecessorChain { vertex: usize },
    }

    #[derive(Debug, Error)]
    pub enum AppError {
        #[error(transparent)]
        Load(#[from] LoadError),
        #[error(transparent)]
        Path(#[from] PathError),
        #[error("{} defines no vertices", .0.display())]
        EmptyGraph(PathBuf),
    }
}

mod graph {
    use crate::error::GraphError;

    pub trait UnweightedGraph {
        fn add_vertex(&mut self) -> usize; // ids are dense and start at 0
        fn add_edge(&mut self, from: usize, to: usize) -> Result<(), GraphError>;
        // in insertion order, unknown vertices have no neighbors
        fn neighbors(&self, vertex: usize) -> impl Iterator<Item = usize> + '_;
        fn vertex_count(&self) -> usize;
        fn edge_count(&self) -> usize;
        fn is_directed(&self) -> bool;
    }

    #[derive(Debug, Clone)]
    pub struct AdjacencyListGraph {
        adjacency: Vec<Vec<usize>>, // vertex -> out-neighbors
        edge_count: usize,
        directed: bool,
    }

    impl AdjacencyListGraph {
        pub fn new(directed: bool) -> Self {
            Self {
                adjacency: Vec::new(),
                edge_count: 0,
                directed,
            }
        }
    }

    impl UnweightedGraph for AdjacencyListGraph {
        fn add_vertex(&mut self) -> usize {
            self.adjacency.push(Vec::new());
            self.adjacency.len() - 1
        }

        fn add_edge(&mut self, from: usize, to: usize) -> Result<(), GraphError> {
            let vertex_count = self.adjacency.len();
            for vertex in [from, to] {
                if vertex >= vertex_count {
                    return Err(GraphError::UnknownVertex {
                        vertex,
                        vertex_count,
                    });
                }
            }

            self.adjacency[from].push(to);
            if !self.directed && from != to {
                self.adjacency[to].push(from); // undirected edges are stored both ways
            }
            self.edge_count += 1;
            Ok(())
        }

        fn neighbors(&self, vertex: usize) -> impl Iterator<Item = usize> + '_ {
            self.adjacency.get(vertex).into_iter().flatten().copied()
        }

        fn vertex_count(&self) -> usize {
            self.adjacency.len()
        }

        fn edge_count(&self) -> usize {
            self.edge_count
        }

        fn is_directed(&self) -> bool {
            self.directed
        }
    }
}

mod vertex_index {
    use std::collections::HashMap;

    use crate::error::LoadError;

    #[derive(Debug, Clone, Default)]
    pub struct VertexNameIndex {
        names: HashMap<usize, String>,
        ids: HashMap<String, usize>,
    }

    impl VertexNameIndex {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&mut self, id: usize, name: String) -> Result<(), LoadError> {
            if let Some(&first) = self.ids.get(&name) {
                return Err(LoadError::DuplicateName {
                    name,
                    first,
                    second: id,
                });
            }
            self.ids.insert(name.clone(), id);
            self.names.insert(id, name);
            Ok(())
        }

        pub fn id_of(&self, name: &str) -> Option<usize> {
            self.ids.get(name).copied()
        }

        pub fn name_of(&self, id: usize) -> Option<&str> {
            self.names.get(&id).map(String::as_str)
        }

        pub fn len(&self) -> usize {
            self.names.len()
        }

        pub fn is_empty(&self) -> bool {
            self.names.is_empty()
        }
    }
}

mod data_loading {
    use std::borrow::Cow;
    use std::fs::File;
    use std::io::{BufRead, BufReader};
    use std::path::Path;

    use csv::{ReaderBuilder, StringRecord};
    use serde::Deserialize;
    use tracing::{debug, info};

    use crate::error::LoadError;
    use crate::graph::UnweightedGraph;
    use crate::vertex_index::VertexNameIndex;

    #[derive(Debug, Deserialize)]
    struct NodeRow {
        name: String,
    }

    #[derive(Debug, Deserialize)]
    struct EdgeRow {
        source: String,
        target: String,
    }

    pub fn decode_name(raw: &str) -> Option<String> {
        let spaced = raw.replace('+', " "); // form encoding, '+' is a space
        urlencoding::decode(&spaced).ok().map(Cow::into_owned)
    }

    fn csv_error(path: &Path) -> impl FnOnce(csv::Error) -> LoadError + '_ {
        move |source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }

    fn parse_line(line: &str) -> Result<Option<StringRecord>, csv::Error> {
        ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .quoting(false)
            .flexible(true)
            .from_reader(line.as_bytes())
            .records()
            .next()
            .transpose()
    }

    // rows come back with their 1-based line number in the file, blank lines
    // and any line containing '#' are dropped
    fn read_rows(path: &Path) -> Result<Vec<(u64, StringRecord)>, LoadError> {
        let io_error = |source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_error)?);

        let mut rows = Vec::new();
        for (number, text) in reader.lines().enumerate() {
            let text = text.map_err(io_error)?;
            let text = text.strip_suffix('\r').unwrap_or(&text);
            let line = number as u64 + 1;
            if text.is_empty() {
                continue;
            }
            if text.contains('#') {
                debug!(path = %path.display(), line, "skipping comment line");
                continue;
            }
            if let Some(record) = parse_line(text).map_err(csv_error(path))? {
                rows.push((line, record));
            }
        }
        Ok(rows)
    }

    fn decode_field(path: &Path, line: u64, raw: &str) -> Result<String, LoadError> {
        decode_name(raw).ok_or_else(|| LoadError::Decode {
            path: path.to_path_buf(),
            line,
            name: raw.to_string(),
        })
    }

    pub fn load_nodes<G: UnweightedGraph>(
        path: &Path,
        graph: &mut G,
        index: &mut VertexNameIndex,
    ) -> Result<usize, LoadError> {
        let mut added = 0;
        for (line, record) in read_rows(path)? {
            let first: StringRecord = record.iter().take(1).collect();
            let row: NodeRow = first.deserialize(None).map_err(csv_error(path))?;
            let name = decode_field(path, line, &row.name)?;
            let id = graph.add_vertex(); // file order decides the ids
            index.insert(id, name)?;
            added += 1;
        }
        info!(path = %path.display(), vertices = added, "loaded nodes");
        Ok(added)
    }

    pub fn load_edges<G: UnweightedGraph>(
        path: &Path,
        graph: &mut G,
        index: &VertexNameIndex,
    ) -> Result<usize, LoadError> {
        let mut added = 0;
        for (line, record) in read_rows(path)? {
            if record.len() < 2 {
                return Err(LoadError::MissingField {
                    path: path.to_path_buf(),
                    line,
                });
            }
            let pair: StringRecord = record.iter().take(2).collect();
            let row: EdgeRow = pair.deserialize(None).map_err(csv_error(path))?;

            let from = resolve(path, line, &row.source, index)?;
            let to = resolve(path, line, &row.target, index)?;
            graph.add_edge(from, to)?;
            added += 1;
        }
        info!(path = %path.display(), edges = added, "loaded edges");
        Ok(added)
    }

    fn resolve(
        path: &Path,
        line: u64,
        raw: &str,
        index: &VertexNameIndex,
    ) -> Result<usize, LoadError> {
        let name = decode_field(path, line, raw)?;
        index
            .id_of(&name)
            .ok_or(LoadError::UnknownEdgeEndpoint {
                path: path.to_path_buf(),
                line,
                name,
            })
    }

    pub fn load_graph<G: UnweightedGraph>(
        node_path: &Path,
        edge_path: &Path,
        mut graph: G,
    ) -> Result<(G, VertexNameIndex), LoadError> {
        let mut index = VertexNameIndex::new();
        load_nodes(node_path, &mut graph, &mut index)?;
        load_edges(edge_path, &mut graph, &index)?;
        Ok((graph, index))
    }
}

mod path_finder {
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;

    use tracing::debug;

    use crate::data_loading::load_graph;
    use crate::error::{LoadError, PathError};
    use crate::graph::{AdjacencyListGraph, UnweightedGraph};
    use crate::vertex_index::VertexNameIndex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SearchRecord {
        pub vertex: usize,
        pub distance: usize,
        pub predecessor: usize, // equals `vertex` for the source
    }

    pub struct PathFinder<G> {
        graph: G,
        index: VertexNameIndex,
    }

    impl PathFinder<AdjacencyListGraph> {
        pub fn from_files(
            node_path: &Path,
            edge_path: &Path,
            directed: bool,
        ) -> Result<Self, LoadError> {
            let (graph, index) =
                load_graph(node_path, edge_path, AdjacencyListGraph::new(directed))?;
            Ok(Self::new(graph, index))
        }
    }

    impl<G: UnweightedGraph> PathFinder<G> {
        pub fn new(graph: G, index: VertexNameIndex) -> Self {
            Self { graph, index }
        }

        pub fn graph(&self) -> &G {
            &self.graph
        }

        pub fn index(&self) -> &VertexNameIndex {
            &self.index
        }

        fn vertex(&self, name: &str) -> Result<usize, PathError> {
            self.index
                .id_of(name)
                .ok_or_else(|| PathError::UnknownVertex(name.to_string()))
        }

        pub fn shortest_path(
            &self,
            source: &str,
            destination: &str,
        ) -> Result<Vec<String>, PathError> {
            let start = self.vertex(source)?;
            let goal = self.vertex(destination)?;
            if start == goal {
                return Ok(vec![source.to_string()]);
            } // zero hops, no traversal

            match self.search(start, goal) {
                Some(records) => reconstruct_path(&records, goal, &self.index),
                None => Ok(Vec::new()),
            }
        }

        pub fn shortest_path_length(
            &self,
            source: &str,
            destination: &str,
        ) -> Result<isize, PathError> {
            let path = self.shortest_path(source, destination)?;
            Ok(path.len() as isize - 1) // -1 when there is no path
        }

        pub fn shortest_path_through(
            &self,
            source: &str,
            intermediate: &str,
            destination: &str,
        ) -> Result<Vec<String>, PathError> {
            let mut path = self.shortest_path(source, intermediate)?;
            let second_leg = self.shortest_path(intermediate, destination)?;
            if path.is_empty() || second_leg.is_empty() {
                return Ok(Vec::new());
            } // either leg missing means no path overall

            path.pop(); // the intermediate vertex, which opens the second leg
            path.extend(second_leg);
            Ok(path)
        }

        fn search(&self, source: usize, destination: usize) -> Option<HashMap<usize, SearchRecord>> {
            let mut records = HashMap::new();
            records.insert(
                source,
                SearchRecord {
                    vertex: source,
                    distance: 0,
                    predecessor: source,
                },
            );
            let mut frontier = VecDeque::new();
            frontier.push_back((source, 0)); // vertex, distance

            while let Some((current, distance)) = frontier.pop_front() {
                for neighbor in self.graph.neighbors(current) {
                    if records.contains_key(&neighbor) {
                        continue;
                    }
                    records.insert(
                        neighbor,
                        SearchRecord {
                            vertex: neighbor,
                            distance: distance + 1,
                            predecessor: current,
                        },
                    );
                    if neighbor == destination {
                        debug!(
                            source,
                            destination,
                            distance = distance + 1,
                            visited = records.len(),
                            "destination found"
                        );
                        return Some(records);
                    } // stops as soon as the destination is discovered
                    frontier.push_back((neighbor, distance + 1));
                }
            }

            debug!(
                source,
                destination,
                visited = records.len(),
                "destination unreachable"
            );
            None
        }
    }

    fn name_of(index: &VertexNameIndex, vertex: usize) -> Result<String, PathError> {
        index
            .name_of(vertex)
            .map(str::to_string)
            .ok_or(PathError::UnnamedVertex(vertex))
    }

    pub(crate) fn reconstruct_path(
        records: &HashMap<usize, SearchRecord>,
        destination: usize,
        index: &VertexNameIndex,
    ) -> Result<Vec<String>, PathError> {
        let mut record = *records
            .get(&destination)
            .ok_or(PathError::BrokenPredecessorChain {
                vertex: destination,
            })?;
        let mut path = vec![name_of(index, record.vertex)?];

        while record.predecessor != record.vertex {
            let previous = records
                .get(&record.predecessor)
                .copied()
                .filter(|previous| previous.distance + 1 == record.distance)
                .ok_or(PathError::BrokenPredecessorChain {
                    vertex: record.vertex,
                })?;
            path.push(name_of(index, previous.vertex)?);
            record = previous;
        } // each step goes exactly one unit closer to the source

        path.reverse();
        Ok(path)
    }
}

mod display {
    pub const NO_PATH_MESSAGE: &str =
        "There is no path between these entries under given parameters.";

    pub fn format_path(path: &[String], source: &str, destination: &str) -> String {
        let length = path.len() as isize - 1;
        let body = if path.is_empty() {
            NO_PATH_MESSAGE.to_string()
        } else {
            path.join(" --> ")
        };
        format!("Path from {source} to {destination}, length = {length}\n{body}\n")
    }

    pub fn display_path(path: &[String], source: &str, destination: &str) {
        print!("{}", format_path(path, source, destination));
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "wiki_path_finder",
    version,
    about = "Finds the fewest-link path between two articles of a link graph"
)]
struct Cli {
    /// File with one URL-encoded article name per line
    node_file: PathBuf,
    /// File with one tab-separated pair of URL-encoded article names per line
    edge_file: PathBuf,
    /// Starting article (random if omitted)
    #[arg(long)]
    from: Option<String>,
    /// Final article (random if omitted)
    #[arg(long)]
    to: Option<String>,
    /// Article the path must pass through
    #[arg(long)]
    via: Option<String>,
    /// Route through a random intermediate article when --via is not given
    #[arg(long)]
    use_intermediate_node: bool,
    /// Store every link in both directions
    #[arg(long)]
    undirected: bool,
    /// Only print the number of links on the path
    #[arg(long)]
    length_only: bool,
    /// Seed for the random article picker
    #[arg(long)]
    seed: Option<u64>,
    #[arg(short, long)]
    verbose: bool,
}

fn pick_vertex(
    given: Option<&str>,
    index: &VertexNameIndex,
    rng: &mut StdRng,
) -> Result<String, PathError> {
    match given {
        Some(name) if index.id_of(name).is_some() => Ok(name.to_string()),
        Some(name) => Err(PathError::UnknownVertex(name.to_string())),
        None => {
            let id = rng.gen_range(0..index.len()); // uniform over all vertices
            index
                .name_of(id)
                .map(str::to_string)
                .ok_or(PathError::UnnamedVertex(id))
        }
    }
}

fn run(cli: &Cli) -> Result<(), AppError> {
    let finder = PathFinder::from_files(&cli.node_file, &cli.edge_file, !cli.undirected)?;
    let index = finder.index();
    if index.is_empty() {
        return Err(AppError::EmptyGraph(cli.node_file.clone()));
    }
    info!(
        vertices = finder.graph().vertex_count(),
        edges = finder.graph().edge_count(),
        directed = finder.graph().is_directed(),
        "graph ready"
    );

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let source = pick_vertex(cli.from.as_deref(), index, &mut rng)?;
    let destination = pick_vertex(cli.to.as_deref(), index, &mut rng)?;

    if cli.via.is_some() || cli.use_intermediate_node {
        let intermediate = pick_vertex(cli.via.as_deref(), index, &mut rng)?;
        let path = finder.shortest_path_through(&source, &intermediate, &destination)?;
        if cli.length_only {
            println!("{}", path.len() as isize - 1);
        } else {
            println!("If we are passing through {intermediate}:");
            display_path(&path, &source, &destination);
        }
    } else if cli.length_only {
        println!("{}", finder.shortest_path_length(&source, &destination)?);
    } else {
        let path = finder.shortest_path(&source, &destination)?;
        display_path(&path, &source, &destination);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
