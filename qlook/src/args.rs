//! CLI argument definition and parsing.

use std::env;
use std::fs;
use std::net::IpAddr;
use std::process;
use std::str::FromStr;
use std::time::Duration;

use owo_colors::OwoColorize;
use qlook::lookup::PtrOptions;
use qlook::options::Options;
use qlook::transport::{HttpMethod, Protocol, TlsOptions, TlsVersion, TransportConfig};
use qlook_proto::{Class, Name, RecordType};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Column,
    #[cfg(feature = "json")]
    Json,
    Raw,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(OutputFormat::Pretty),
            "column" => Ok(OutputFormat::Column),
            #[cfg(feature = "json")]
            "json" => Ok(OutputFormat::Json),
            "raw" => Ok(OutputFormat::Raw),
            x => Err(format!("Invalid output format: {}.", x)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    pub servers: Vec<String>,
    /// Forced by a protocol flag; inferred from each server string otherwise.
    pub protocol: Option<Protocol>,
    pub query: Options,
    pub transport: TransportConfig,
    pub tls: TlsOptions,
    pub ptr: PtrOptions,
    pub format: OutputFormat,
    pub verbosity: u8,
    pub help: bool,
    pub version: bool,
}

enum ConsumeNext {
    Format,
    PtrServer,
}

const FALLBACK_SERVER: &str = "1.1.1.1";
const RESOLV_CONF: &str = "/etc/resolv.conf";

impl Args {
    pub fn parse() -> Self {
        // skip executable name
        let args = match Self::try_parse(env::args().skip(1)) {
            Ok(args) => args,
            Err(e) => err(e),
        };
        if args.help {
            print_help();
            process::exit(0);
        }
        if args.version {
            print_version();
            process::exit(0);
        }
        args
    }

    pub fn try_parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut servers = Vec::new();
        let mut protocol = None;
        let mut query = Options::default();
        let mut types = Vec::new();
        let mut name = None;
        let mut transport = TransportConfig::default();
        let mut tls = TlsOptions::default();
        let mut ptr = PtrOptions::default();
        let mut format = OutputFormat::Pretty;
        let mut verbosity = 0;
        let mut help = false;
        let mut version = false;

        let mut reverse = false;
        let mut consume_next = None;

        for arg in args {
            if let Some(to_consume) = &consume_next {
                match to_consume {
                    ConsumeNext::Format => format = arg.parse()?,
                    ConsumeNext::PtrServer => {
                        ptr.enabled = true;
                        ptr.server = Some(arg);
                    }
                }
                consume_next = None;
            } else if let Some(server) = arg.strip_prefix('@') {
                servers.push(server.to_string());
            } else if let Some(flag) = arg.strip_prefix('+') {
                let (flag, value) = match flag.split_once('=') {
                    Some((flag, value)) => (flag, Some(value)),
                    None => (flag, None),
                };
                let value = || value.ok_or_else(|| format!("Flag +{} needs a value.", flag));
                match flag {
                    // transports
                    "udp" => protocol = Some(Protocol::Plain),
                    "tcp" => protocol = Some(Protocol::Tcp),
                    "tls" | "dot" => protocol = Some(Protocol::Tls),
                    "quic" | "doq" => protocol = Some(Protocol::Quic),
                    "https" | "doh" => protocol = Some(Protocol::Http),
                    "dnscrypt" => protocol = Some(Protocol::DnsCrypt),
                    "reuse" => transport.reuse_conn = true,
                    "timeout" => {
                        let secs: f64 = value()?
                            .parse()
                            .map_err(|_| format!("Invalid timeout: {}.", value().unwrap_or("")))?;
                        transport.timeout = Duration::try_from_secs_f64(secs)
                            .map_err(|_| format!("Invalid timeout: {}.", secs))?;
                    }
                    "tls-insecure" => tls.insecure_skip_verify = true,
                    "tls-server-name" => transport.tls_server_name = Some(value()?.to_string()),
                    "tls-min" => tls.min_version = parse_tls_version(value()?)?,
                    "tls-max" => tls.max_version = parse_tls_version(value()?)?,
                    "http-method" => {
                        transport.http_method =
                            HttpMethod::from_str(value()?).map_err(|e| e.to_string())?
                    }
                    "header" => transport.http_headers.push(value()?.to_string()),
                    "user-agent" => transport.http_user_agent = value()?.to_string(),
                    "http2" => transport.http2 = true,
                    "http3" => transport.http3 = true,
                    "odoh-proxy" => transport.odoh_proxy = Some(value()?.to_string()),
                    "no-pmtud" => transport.pmtud = false,
                    "quic-alpn" => {
                        transport.quic_alpn_tokens =
                            value()?.split(',').map(str::to_string).collect()
                    }
                    "no-quic-length-prefix" => transport.quic_length_prefix = false,
                    "dnscrypt-tcp" => transport.dnscrypt_tcp = true,
                    "dnscrypt-udp-size" => transport.dnscrypt_udp_size = parse_num(flag, value()?)?,
                    "dnscrypt-key" => transport.dnscrypt_public_key = Some(value()?.to_string()),
                    "dnscrypt-provider" => transport.dnscrypt_provider = Some(value()?.to_string()),

                    // header
                    "aa" => query.header.aa = true,
                    "ad" => query.header.ad = true,
                    "cd" => query.header.cd = true,
                    "rd" => query.header.rd = true,
                    "no-rd" => query.header.rd = false,
                    "ra" => query.header.ra = true,
                    "z" => query.header.z = true,
                    "tc" => query.header.tc = true,
                    "id" => query.id = Some(parse_num(flag, value()?)?),

                    // EDNS
                    "dnssec" | "do" => query.edns.dnssec = true,
                    "nsid" => query.edns.nsid = true,
                    "padding" => query.edns.pad = true,
                    "subnet" => query.edns.client_subnet = Some(value()?.to_string()),
                    "cookie" => query.edns.cookie = Some(value()?.to_string()),
                    "bufsize" => {
                        query.udp_buffer = parse_num(flag, value()?)?;
                        transport.udp_buffer = query.udp_buffer;
                    }

                    x => return Err(format!("Invalid flag: +{}.", x)),
                }
            } else if let Some(option) = arg.strip_prefix('-') {
                match option {
                    "h" | "-help" => help = true,
                    "V" | "-version" => version = true,
                    "v" => verbosity += 1,
                    "vv" => verbosity += 2,
                    "x" => reverse = true,
                    "R" | "-resolve-ptr" => ptr.enabled = true,
                    "-ptr-server" => consume_next = Some(ConsumeNext::PtrServer),
                    "f" | "-format" => consume_next = Some(ConsumeNext::Format),
                    x => return Err(format!("Invalid option: -{}.", x)),
                }
            } else if let Some(rtype) = RecordType::from_mnemonic(&arg) {
                types.push(rtype);
            } else if let Some(class) = Class::from_mnemonic(&arg) {
                query.class = class;
            } else {
                // use name as fallback
                name = Some(arg);
            }
        }

        if consume_next.is_some() {
            return Err("Missing value for the last option.".into());
        }

        let name = name.unwrap_or_else(|| ".".into());
        if reverse {
            let ip = IpAddr::from_str(&name).map_err(|_| {
                format!("Expected IP address for reverse lookup, but got: {}.", name)
            })?;
            query.name = Name::reverse(ip);
            if types.is_empty() {
                types.push(RecordType::PTR);
            }
        } else {
            query.name = Name::from_ascii(&name).map_err(|e| e.to_string())?;
        }
        if !types.is_empty() {
            query.types = types;
        }

        if servers.is_empty() {
            servers.push(system_nameserver().unwrap_or_else(|| FALLBACK_SERVER.to_string()));
        }

        Ok(Self {
            servers,
            protocol,
            query,
            transport,
            tls,
            ptr,
            format,
            verbosity,
            help,
            version,
        })
    }
}

fn parse_num<T: FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid value for +{}: {}.", flag, value))
}

fn parse_tls_version(value: &str) -> Result<TlsVersion, String> {
    value.parse().map_err(|e: qlook::ConfigError| e.to_string())
}

/// Returns the first nameserver from the system's resolver configuration.
fn system_nameserver() -> Option<String> {
    let conf = fs::read_to_string(RESOLV_CONF).ok()?;
    first_nameserver(&conf)
}

fn first_nameserver(conf: &str) -> Option<String> {
    conf.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("nameserver"), Some(addr)) => {
                    // strip the zone of link-local IPv6 addresses
                    let addr = addr.split('%').next().unwrap_or(addr);
                    Some(addr.to_string())
                }
                _ => None,
            }
        })
}

macro_rules! var {
    ($var:expr) => {
        $var.if_supports_color(owo_colors::Stream::Stdout, |s| s.green())
    };
}

macro_rules! printopt {
    ($opt:expr, $desc:expr) => {
        println!(
            "\t    {:<22} ({})",
            $opt.if_supports_color(owo_colors::Stream::Stdout, |s| s.yellow()),
            $desc,
        )
    };
}

macro_rules! printflag {
    ($flag:expr, $desc:expr) => {
        println!(
            "\t    {:<26} ({})",
            $flag.if_supports_color(owo_colors::Stream::Stdout, |s| s.yellow()),
            $desc,
        )
    };
}

fn print_help() {
    let output = owo_colors::Stream::Stdout;
    print!("{}", "Usage:".if_supports_color(output, |s| s.purple()));
    println!(
        "\tqlook [@{}...] [{}] [{}...] [{}] [{}] [{}]",
        var!("server"),
        var!("name"),
        var!("type"),
        var!("class"),
        var!("options"),
        var!("flags")
    );
    println!();

    println!("{}", "Where:".if_supports_color(output, |s| s.purple()));
    println!(
        "\t{} is a nameserver, optionally with a scheme (udp, tcp, tls, quic, https) or an sdns:// stamp",
        var!("server")
    );
    println!("\t{} is the domain you want to query", var!("name"));
    println!(
        "\t{} is one or more record types (e.g. A, AAAA, MX, TXT, TYPE65)",
        var!("type")
    );
    println!("\t{} is the query class (default IN)", var!("class"));
    println!();

    println!("\t{} is one or more of the following:", var!("options"));
    printopt!("-h | --help", "print this help message");
    printopt!("-V | --version", "print the version of qlook");
    printopt!("-v | -vv", "log debug / trace output to stderr");
    printopt!("-f | --format <format>", "pretty, column, json or raw");
    printopt!("-x", "reverse lookup of an IP address");
    printopt!("-R | --resolve-ptr", "annotate addresses with their PTR names");
    printopt!("--ptr-server <server>", "use this server for -R; implies -R");
    println!();

    println!("\t{} is one or more of the following:", var!("flags"));
    printflag!("+udp | +tcp", "plain DNS; UDP falls back to TCP");
    printflag!("+tls | +quic | +https", "DNS over TLS, QUIC or HTTPS");
    printflag!("+dnscrypt", "DNSCrypt; see +dnscrypt-*");
    printflag!("+reuse", "reuse connections between queries");
    printflag!("+timeout=<secs>", "per-exchange timeout, default 5");
    printflag!("+tls-insecure", "don't verify server certificates");
    printflag!("+tls-server-name=<name>", "SNI for DoT and DoQ");
    printflag!("+tls-min=<v> | +tls-max=<v>", "TLS versions 1.2 or 1.3");
    printflag!("+http-method=<GET|POST>", "DoH request method");
    printflag!("+header=<Name: value>", "extra DoH request header");
    printflag!("+user-agent=<agent>", "DoH user agent");
    printflag!("+http2 | +http3", "DoH over HTTP/2 or HTTP/3");
    printflag!("+odoh-proxy=<url>", "use Oblivious DoH via this proxy");
    printflag!("+quic-alpn=<a,b>", "DoQ ALPN tokens");
    printflag!("+no-quic-length-prefix", "for servers following early DoQ drafts");
    printflag!("+no-pmtud", "disable QUIC path MTU discovery");
    printflag!("+dnscrypt-tcp", "DNSCrypt over TCP");
    printflag!("+dnscrypt-udp-size=<n>", "largest DNSCrypt UDP message");
    printflag!("+dnscrypt-key=<hex>", "provider key, if not using a stamp");
    printflag!("+dnscrypt-provider=<name>", "provider name, if not using a stamp");
    printflag!("+aa +ad +cd +ra +z +tc", "set the header flag");
    printflag!("+no-rd", "clear the recursion desired flag");
    printflag!("+id=<n>", "use this message ID");
    printflag!("+dnssec", "set the DO bit");
    printflag!("+nsid", "request the server's NSID");
    printflag!("+padding", "pad queries to a multiple of 128 bytes");
    printflag!("+subnet=<cidr>", "EDNS client subnet");
    printflag!("+cookie=<hex>", "EDNS client cookie");
    printflag!("+bufsize=<n>", "EDNS UDP payload size, default 1232");
    println!();

    println!("Note: the order of the arguments does not matter.");
    println!(
        "Without @{}, the first nameserver of {} is used, or {}.",
        var!("server"),
        RESOLV_CONF,
        FALLBACK_SERVER
    );
    println!();

    println!(
        "Output is colourized by default. This can be tuned using the {}/\n{} environment variables.",
        var!("FORCE_COLOR"),
        var!("NO_COLOR")
    );
}

fn print_version() {
    println!("qlook v{}", env!("CARGO_PKG_VERSION"));
}

pub fn err(msg: impl AsRef<str>) -> ! {
    eprintln!("{}", msg.as_ref());
    process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, String> {
        Args::try_parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn positional_arguments() {
        let args = parse(&["example.org", "mx", "@192.0.2.53", "TYPE65", "ch", "@9.9.9.9"]).unwrap();
        assert_eq!(args.query.name, Name::from_ascii("example.org").unwrap());
        assert_eq!(
            args.query.types,
            vec![RecordType::MX, RecordType::HTTPS]
        );
        assert_eq!(args.query.class, Class::CH);
        assert_eq!(args.servers, vec!["192.0.2.53", "9.9.9.9"]);
        assert_eq!(args.protocol, None);
    }

    #[test]
    fn flags_fill_options() {
        let args = parse(&[
            "@tls://dns.example",
            "+tls",
            "+padding",
            "+subnet=192.0.2.0/24",
            "+no-rd",
            "+cd",
            "+id=7",
            "+bufsize=4096",
            "+header=X-Test: a",
            "+timeout=0.5",
        ])
        .unwrap();
        assert_eq!(args.protocol, Some(Protocol::Tls));
        assert!(args.query.edns.pad);
        assert_eq!(args.query.edns.client_subnet.as_deref(), Some("192.0.2.0/24"));
        assert!(!args.query.header.rd && args.query.header.cd);
        assert_eq!(args.query.id, Some(7));
        assert_eq!(args.query.udp_buffer, 4096);
        assert_eq!(args.transport.udp_buffer, 4096);
        assert_eq!(args.transport.http_headers, vec!["X-Test: a"]);
        assert_eq!(args.transport.timeout, Duration::from_millis(500));
    }

    #[test]
    fn reverse_lookup() {
        let args = parse(&["-x", "192.0.2.1", "@192.0.2.53"]).unwrap();
        assert_eq!(args.query.name.to_string(), "1.2.0.192.in-addr.arpa");
        assert_eq!(args.query.types, vec![RecordType::PTR]);

        assert!(parse(&["-x", "example.org"]).is_err());
    }

    #[test]
    fn ptr_server_implies_enrichment() {
        let args = parse(&["--ptr-server", "192.0.2.54", "@192.0.2.53"]).unwrap();
        assert!(args.ptr.enabled);
        assert_eq!(args.ptr.server.as_deref(), Some("192.0.2.54"));
        assert!(parse(&["--ptr-server"]).is_err());
    }

    #[test]
    fn invalid_arguments() {
        assert!(parse(&["+frobnicate"]).is_err());
        assert!(parse(&["+subnet"]).is_err());
        assert!(parse(&["+id=70000"]).is_err());
        assert!(parse(&["-q"]).is_err());
        assert!(parse(&["-f", "yaml"]).is_err());
    }

    #[test]
    fn resolv_conf_nameserver() {
        let conf = "# generated\nsearch example.org\nnameserver fe80::1%eth0\nnameserver 192.0.2.53\n";
        assert_eq!(first_nameserver(conf).as_deref(), Some("fe80::1"));
        assert_eq!(first_nameserver("options edns0\n"), None);
    }
}
